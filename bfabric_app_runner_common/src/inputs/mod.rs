//! Resolving declared inputs and staging them into a working directory.
//!
//! Inputs go through two phases. [`Resolver`] turns `inputs.yml` entries
//! into concrete [`ResolvedInput`]s, batching LIMS reads by entity type.
//! [`Stager`] then fetches, links or writes each of them, skipping inputs
//! which are already in place.

use glob::Pattern;

use crate::prelude::*;
use crate::specs::inputs::InputsSpec;

mod integrity;
mod list;
mod prepare;
mod resolve;
mod resolved;

pub use self::integrity::*;
pub use self::list::*;
pub use self::prepare::*;
pub use self::resolve::*;
pub use self::resolved::*;

/// What [`prepare_folder`] should do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrepareAction {
    /// Stage inputs.
    Prepare,
    /// Remove staged inputs.
    Clean,
}

/// Resolve the inputs declared in `inputs_yaml` and stage or remove them.
///
/// `target_folder` defaults to the directory containing `inputs_yaml`. With
/// a `filter`, only the input with exactly that filename is handled.
#[instrument(level = "debug", skip(lims, stager))]
pub fn prepare_folder(
    lims: &Lims,
    stager: &Stager<'_>,
    inputs_yaml: &Path,
    target_folder: Option<&Path>,
    filter: Option<&str>,
    action: PrepareAction,
) -> Result<()> {
    let inputs = resolve_inputs_file(lims, inputs_yaml, filter)?;
    let target_folder = default_target_folder(inputs_yaml, target_folder);
    match action {
        PrepareAction::Prepare => {
            fs::create_dir_all(&target_folder)
                .with_context(|| format!("could not create {}", target_folder.display()))?;
            let actions = stager.prepare(&inputs, &target_folder)?;
            let written = actions.iter().filter(|a| **a == StageAction::Written).count();
            info!(
                "prepared {} inputs in {} ({} already in place)",
                written,
                target_folder.display(),
                actions.len() - written,
            );
            Ok(())
        }
        PrepareAction::Clean => stager.clean(&inputs, &target_folder),
    }
}

/// Read and resolve an `inputs.yml` file.
pub fn resolve_inputs_file(lims: &Lims, inputs_yaml: &Path, filter: Option<&str>) -> Result<ResolvedInputs> {
    let spec = InputsSpec::read(inputs_yaml)?;
    let inputs = Resolver::new(lims).resolve(&spec.inputs)?;
    match filter {
        Some(filter) => inputs.filter(filter),
        None => Ok(inputs),
    }
}

/// The folder inputs are staged into, if none is given explicitly.
pub fn default_target_folder(inputs_yaml: &Path, target_folder: Option<&Path>) -> PathBuf {
    match target_folder {
        Some(folder) => folder.to_owned(),
        None => match inputs_yaml.parent() {
            Some(parent) if parent != Path::new("") => parent.to_owned(),
            _ => PathBuf::from("."),
        },
    }
}

/// Include and exclude glob patterns applied to relative paths. An empty
/// include list selects everything, and excludes always win.
#[derive(Clone, Debug)]
pub(crate) struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    pub(crate) fn new(include: &[String], exclude: &[String]) -> Result<PathFilter> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|err| {
                        RunnerError::config(format!("invalid glob pattern {:?}: {}", p, err))
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        Ok(PathFilter {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub(crate) fn matches(&self, path: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(path));
        included && !self.exclude.iter().any(|p| p.matches(path))
    }

    /// Include patterns which match none of `paths`.
    pub(crate) fn unmatched_includes<'p, I>(&self, paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'p str>,
    {
        let mut used = vec![false; self.include.len()];
        for path in paths {
            for (idx, pattern) in self.include.iter().enumerate() {
                if pattern.matches(path) {
                    used[idx] = true;
                }
            }
        }
        self.include
            .iter()
            .zip(used)
            .filter(|(_, used)| !used)
            .map(|(pattern, _)| pattern.as_str().to_owned())
            .collect()
    }
}

#[test]
fn path_filter_semantics() {
    let all = PathFilter::new(&[], &[]).unwrap();
    assert!(all.matches("a/b.txt"));

    let filter = PathFilter::new(
        &["*.txt".to_owned(), "*.csv".to_owned()],
        &["secret*".to_owned()],
    )
    .unwrap();
    assert!(filter.matches("notes.txt"));
    assert!(filter.matches("sub/notes.txt"));
    assert!(!filter.matches("secret.txt"));
    assert!(!filter.matches("image.png"));
    assert_eq!(filter.unmatched_includes(vec!["a.txt", "b.png"]), vec!["*.csv".to_owned()]);

    assert!(PathFilter::new(&["[".to_owned()], &[]).is_err());
}

#[test]
fn target_folder_defaults_to_the_yaml_parent() {
    assert_eq!(
        default_target_folder(Path::new("/w/chunk/inputs.yml"), None),
        PathBuf::from("/w/chunk")
    );
    assert_eq!(default_target_folder(Path::new("inputs.yml"), None), PathBuf::from("."));
    assert_eq!(
        default_target_folder(Path::new("inputs.yml"), Some(Path::new("/t"))),
        PathBuf::from("/t")
    );
}
