//! Staging resolved inputs into a working directory.

use std::io;
use tempfile::NamedTempFile;

use super::integrity::{archive_path, check_integrity, IntegrityState};
use super::resolved::{ResolvedDirectory, ResolvedFile, ResolvedInput, ResolvedInputs};
use super::PathFilter;
use crate::checksums::{checksums_match, md5_file};
use crate::prelude::*;
use crate::process::{CommandLine, ProcessRunner};
use crate::scp::ScpPort;
use crate::specs::inputs::{ArchiveFormat, FileSource};

/// What staging did with one input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageAction {
    /// The input was already in place.
    Skipped,
    /// The input was fetched, linked or written.
    Written,
}

/// Stages inputs using external copy tools.
pub struct Stager<'a> {
    runner: &'a dyn ProcessRunner,
    scp: &'a dyn ScpPort,
    ssh_user: Option<&'a str>,
}

impl<'a> Stager<'a> {
    /// Create a stager. `runner` is used for `rsync`, and `scp` when
    /// `rsync` is unavailable or fails.
    pub fn new(
        runner: &'a dyn ProcessRunner,
        scp: &'a dyn ScpPort,
        ssh_user: Option<&'a str>,
    ) -> Stager<'a> {
        Stager {
            runner,
            scp,
            ssh_user,
        }
    }

    /// Make sure every input is in place below `working_dir`.
    #[instrument(level = "debug", skip(self, inputs))]
    pub fn prepare(&self, inputs: &ResolvedInputs, working_dir: &Path) -> Result<Vec<StageAction>> {
        inputs
            .files()
            .iter()
            .map(|input| {
                self.stage(input, working_dir).with_context(|| {
                    format!("could not prepare input {}", input.filename())
                })
            })
            .collect()
    }

    /// Remove every input which exists below `working_dir`.
    #[instrument(level = "debug", skip(self, inputs))]
    pub fn clean(&self, inputs: &ResolvedInputs, working_dir: &Path) -> Result<()> {
        for input in inputs.files() {
            let path = working_dir.join(input.filename().as_path());
            if let ResolvedInput::Directory(dir) = input {
                if dir.filename.as_str() == "." {
                    warn!("not removing the working directory itself");
                } else if path.is_dir() {
                    fs::remove_dir_all(&path)
                        .with_context(|| format!("could not remove {}", path.display()))?;
                    info!("removed {}", path.display());
                }
                remove_file_if_exists(&archive_path(dir, &path))?;
            } else {
                remove_file_if_exists(&path)?;
            }
        }
        Ok(())
    }

    fn stage(&self, input: &ResolvedInput, working_dir: &Path) -> Result<StageAction> {
        let target = working_dir.join(input.filename().as_path());
        if let ResolvedInput::File(file) = input {
            if file.link {
                return link_file(file, &target);
            }
        }

        let state = check_integrity(input, &target);
        match state {
            IntegrityState::Correct | IntegrityState::NotChecked => {
                debug!("{} is {}, skipping", target.display(), state);
                return Ok(StageAction::Skipped);
            }
            IntegrityState::Missing | IntegrityState::Incorrect => {
                info!("{} is {}, preparing", target.display(), state);
            }
        }

        match input {
            ResolvedInput::File(file) => {
                self.fetch(&file.source, file.checksum.as_deref(), &target)?
            }
            ResolvedInput::Static(file) => write_atomically(&target, &file.content)?,
            ResolvedInput::Directory(dir) => self.stage_directory(dir, &target)?,
        }
        Ok(StageAction::Written)
    }

    /// Copy `source` to `target` through a partial file, which is only
    /// renamed into place once its checksum is verified.
    fn fetch(&self, source: &FileSource, checksum: Option<&str>, target: &Path) -> Result<()> {
        let parent = parent_dir(target)?;
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
        let partial = partial_path(target);
        remove_file_if_exists(&partial)?;

        if !self.copy_with_rsync(source, &partial) {
            self.copy_directly(source, &partial)?;
        }

        if let Some(expected) = checksum {
            let actual = md5_file(&partial)?;
            if !checksums_match(expected, &actual) {
                remove_file_if_exists(&partial)?;
                return Err(RunnerError::integrity(format!(
                    "checksum of {} is {}, expected {}",
                    source_display(source),
                    actual,
                    expected
                )));
            }
        }
        fs::rename(&partial, target)
            .with_context(|| format!("could not move {} into place", target.display()))?;
        Ok(())
    }

    /// Try `rsync`, returning whether it worked.
    fn copy_with_rsync(&self, source: &FileSource, target: &Path) -> bool {
        let source = match (source, self.ssh_user) {
            (FileSource::Ssh { host, path }, Some(user)) => format!("{}@{}:{}", user, host, path),
            (FileSource::Ssh { host, path }, None) => format!("{}:{}", host, path),
            (FileSource::Local(path), _) => path.clone(),
        };
        let cmd = CommandLine::new(
            "rsync",
            vec!["-Pav".to_owned(), source, target.display().to_string()],
        );
        info!("{}", cmd.display());
        match self.runner.run(&cmd) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!("rsync failed with {}, falling back", output.status_description());
                false
            }
            Err(err) => {
                warn!("could not run rsync, falling back: {}", err);
                false
            }
        }
    }

    fn copy_directly(&self, source: &FileSource, target: &Path) -> Result<()> {
        match source {
            FileSource::Ssh { host, path } => self.scp.scp(
                &format!("{}:{}", host, path),
                &target.display().to_string(),
                self.ssh_user,
                false,
            ),
            FileSource::Local(path) => {
                info!("cp {} {}", path, target.display());
                fs::copy(path, target)
                    .with_context(|| format!("could not copy {} to {}", path, target.display()))?;
                Ok(())
            }
        }
    }

    /// Download an archive next to `target` and extract it there.
    fn stage_directory(&self, dir: &ResolvedDirectory, target: &Path) -> Result<()> {
        let archive = archive_path(dir, target);
        let archive_ok = match &dir.checksum {
            Some(expected) if archive.is_file() => checksums_match(expected, &md5_file(&archive)?),
            _ => false,
        };
        if !archive_ok {
            self.fetch(&dir.source, dir.checksum.as_deref(), &archive)?;
        }
        if dir.filename.as_str() != "." && target.exists() {
            fs::remove_dir_all(target)
                .with_context(|| format!("could not remove stale {}", target.display()))?;
        }
        fs::create_dir_all(target)
            .with_context(|| format!("could not create {}", target.display()))?;
        match dir.extract {
            ArchiveFormat::Zip => extract_zip(&archive, target, dir),
        }
    }
}

/// Extract the members of `archive` selected by `dir`'s patterns.
///
/// Include patterns which match no member are logged. Extracting nothing
/// at all is an error.
fn extract_zip(archive: &Path, dest: &Path, dir: &ResolvedDirectory) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("could not open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("could not read zip archive {}", archive.display()))?;

    let mut members = vec![];
    for idx in 0..zip.len() {
        let entry = zip.by_index(idx)?;
        if entry.is_dir() {
            continue;
        }
        let path = entry
            .enclosed_name()
            .ok_or_else(|| {
                RunnerError::integrity(format!(
                    "archive member {:?} escapes the target directory",
                    entry.name()
                ))
            })?
            .to_owned();
        members.push((idx, path));
    }

    let root = if dir.strip_root {
        Some(single_root(&members)?)
    } else {
        None
    };
    let relative = members
        .into_iter()
        .map(|(idx, path)| {
            let rel = match &root {
                Some(root) => path.strip_prefix(root)?.to_owned(),
                None => path,
            };
            Ok((idx, rel))
        })
        .collect::<Result<Vec<(usize, PathBuf)>>>()?;

    let filter = PathFilter::new(&dir.include_patterns, &dir.exclude_patterns)?;
    let names = relative
        .iter()
        .map(|(_, rel)| rel.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    for pattern in filter.unmatched_includes(names.iter().map(String::as_str)) {
        warn!("include pattern {:?} matched nothing in {}", pattern, archive.display());
    }

    let mut extracted = 0;
    for ((idx, rel), name) in relative.iter().zip(&names) {
        if !filter.matches(name) {
            trace!("skipping archive member {}", name);
            continue;
        }
        let out_path = dest.join(rel);
        let parent = parent_dir(&out_path)?;
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
        let mut entry = zip.by_index(*idx)?;
        let mut out = File::create(&out_path)
            .with_context(|| format!("could not create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("could not extract {}", name))?;
        extracted += 1;
    }
    if extracted == 0 {
        return Err(RunnerError::integrity(format!(
            "no files were extracted from {}",
            archive.display()
        )));
    }
    info!("extracted {} files into {}", extracted, dest.display());
    Ok(())
}

/// The single top-level directory shared by all members.
fn single_root(members: &[(usize, PathBuf)]) -> Result<PathBuf> {
    let mut root = None;
    for (_, path) in members {
        let mut components = path.components();
        let first = components.next();
        if components.next().is_none() {
            return Err(RunnerError::config(format!(
                "cannot strip archive root: {} is at the top level",
                path.display()
            )));
        }
        match (&root, first) {
            (None, Some(first)) => root = Some(PathBuf::from(first.as_os_str())),
            (Some(root), Some(first)) if root.as_os_str() == first.as_os_str() => {}
            _ => {
                return Err(RunnerError::config(
                    "cannot strip archive root: members have different top-level directories",
                ))
            }
        }
    }
    root.ok_or_else(|| RunnerError::integrity("archive is empty"))
}

/// Link `target` to a local source with a relative symlink.
fn link_file(file: &ResolvedFile, target: &Path) -> Result<StageAction> {
    let source = match &file.source {
        FileSource::Local(path) => Path::new(path),
        FileSource::Ssh { .. } => {
            return Err(RunnerError::config(format!(
                "cannot link to remote file {}",
                source_display(&file.source)
            )))
        }
    };
    let parent = parent_dir(target)?;
    fs::create_dir_all(parent)
        .with_context(|| format!("could not create {}", parent.display()))?;
    let source = source
        .canonicalize()
        .with_context(|| format!("could not find link source {}", source.display()))?;
    let link_target = relative_path(&source, &parent.canonicalize()?);

    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if target.canonicalize().ok().as_ref() == Some(&source) {
                debug!("{} already links to {}", target.display(), source.display());
                return Ok(StageAction::Skipped);
            }
            info!("rm {}", target.display());
            fs::remove_file(target)?;
        }
        Ok(_) => {
            return Err(format_err!(
                "{} already exists and is not a symlink",
                target.display()
            ))
        }
        Err(_) => {}
    }
    info!("ln -s {} {}", link_target.display(), target.display());
    std::os::unix::fs::symlink(&link_target, target)
        .with_context(|| format!("could not link {}", target.display()))?;
    Ok(StageAction::Written)
}

/// The path of `path` relative to the directory `base`. Both must be
/// absolute and canonical.
fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path_parts = path.components().collect::<Vec<_>>();
    let base_parts = base.components().collect::<Vec<_>>();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative
}

/// Write `content` to `path` unless it already holds exactly that, so
/// unchanged files keep their modification time.
fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    if path.exists() {
        if !path.is_file() {
            return Err(format_err!("{} exists but is not a file", path.display()));
        }
        if fs::read(path)? == content {
            return Ok(());
        }
    }
    let parent = parent_dir(path)?;
    fs::create_dir_all(parent)
        .with_context(|| format!("could not create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("could not create a temporary file in {}", parent.display()))?;
    tmp.write_all(content)?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("could not write {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| format_err!("{} has no parent directory", path.display()))
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => {
            fs::remove_file(path).with_context(|| format!("could not remove {}", path.display()))?;
            info!("removed {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("could not inspect {}", path.display())),
    }
}

fn source_display(source: &FileSource) -> String {
    match source {
        FileSource::Ssh { host, path } => format!("{}:{}", host, path),
        FileSource::Local(path) => path.clone(),
    }
}
