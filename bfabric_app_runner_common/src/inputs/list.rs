//! Reporting on staged inputs.

use super::integrity::{check_integrity, IntegrityState};
use super::resolved::ResolvedInputs;
use crate::prelude::*;

/// The state of one input in a working directory.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InputState {
    /// The input's path, relative to the working directory.
    pub filename: String,
    /// The input's full path.
    pub path: PathBuf,
    /// Where the input comes from.
    pub source: String,
    /// Does anything exist at `path`?
    pub exists: bool,
    /// The result of checking the input. Without `check`, everything which
    /// exists is reported as [`IntegrityState::NotChecked`].
    pub integrity: IntegrityState,
}

/// Report on each input below `working_dir`.
pub fn list_input_states(inputs: &ResolvedInputs, working_dir: &Path, check: bool) -> Vec<InputState> {
    inputs
        .files()
        .iter()
        .map(|input| {
            let path = working_dir.join(input.filename().as_path());
            let exists = fs::symlink_metadata(&path).is_ok();
            let integrity = if !exists {
                IntegrityState::Missing
            } else if check {
                check_integrity(input, &path)
            } else {
                IntegrityState::NotChecked
            };
            InputState {
                filename: input.filename().to_string(),
                source: input.source_description(),
                path,
                exists,
                integrity,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::{ResolvedInput, ResolvedStaticFile};
    use crate::specs::RelativePath;

    #[test]
    fn states_are_reported_in_order() {
        let inputs = ResolvedInputs::new(vec![
            ResolvedInput::Static(ResolvedStaticFile {
                filename: RelativePath::new("present.txt").unwrap(),
                content: b"hello".to_vec(),
            }),
            ResolvedInput::Static(ResolvedStaticFile {
                filename: RelativePath::new("absent.txt").unwrap(),
                content: b"bye".to_vec(),
            }),
        ])
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("present.txt"), b"hello").unwrap();

        let unchecked = list_input_states(&inputs, dir.path(), false);
        assert_eq!(unchecked[0].integrity, IntegrityState::NotChecked);
        assert!(unchecked[0].exists);
        assert_eq!(unchecked[1].integrity, IntegrityState::Missing);
        assert!(!unchecked[1].exists);

        let checked = list_input_states(&inputs, dir.path(), true);
        assert_eq!(checked[0].integrity, IntegrityState::Correct);
        assert_eq!(checked[0].filename, "present.txt");
    }
}
