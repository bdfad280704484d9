//! Inputs after all LIMS lookups have been done.

use std::collections::BTreeSet;

use crate::prelude::*;
use crate::specs::inputs::{ArchiveFormat, FileSource};
use crate::specs::RelativePath;

/// A file copied or linked from somewhere else.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedFile {
    /// Where to put it.
    pub filename: RelativePath,
    /// Where it comes from.
    pub source: FileSource,
    /// Symlink instead of copying.
    pub link: bool,
    /// The expected MD5 checksum.
    pub checksum: Option<String>,
}

/// A file whose contents we already know.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedStaticFile {
    /// Where to put it.
    pub filename: RelativePath,
    /// The bytes to write.
    pub content: Vec<u8>,
}

/// A directory extracted from an archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedDirectory {
    /// The directory to extract into.
    pub filename: RelativePath,
    /// Where the archive comes from.
    pub source: FileSource,
    /// The archive format.
    pub extract: ArchiveFormat,
    /// Members to extract; empty means all.
    pub include_patterns: Vec<String>,
    /// Members to skip.
    pub exclude_patterns: Vec<String>,
    /// Drop the single top-level directory of the archive.
    pub strip_root: bool,
    /// The expected MD5 checksum of the archive.
    pub checksum: Option<String>,
}

/// Any resolved input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolvedInput {
    /// See [`ResolvedFile`].
    File(ResolvedFile),
    /// See [`ResolvedStaticFile`].
    Static(ResolvedStaticFile),
    /// See [`ResolvedDirectory`].
    Directory(ResolvedDirectory),
}

impl ResolvedInput {
    /// Where this input goes, relative to the working directory.
    pub fn filename(&self) -> &RelativePath {
        match self {
            ResolvedInput::File(file) => &file.filename,
            ResolvedInput::Static(file) => &file.filename,
            ResolvedInput::Directory(dir) => &dir.filename,
        }
    }

    /// A short description of where this input comes from.
    pub fn source_description(&self) -> String {
        let describe = |source: &FileSource| match source {
            FileSource::Ssh { host, path } => format!("{}:{}", host, path),
            FileSource::Local(path) => path.clone(),
        };
        match self {
            ResolvedInput::File(file) if file.link => format!("link to {}", describe(&file.source)),
            ResolvedInput::File(file) => describe(&file.source),
            ResolvedInput::Static(file) => format!("static ({} bytes)", file.content.len()),
            ResolvedInput::Directory(dir) => format!("archive {}", describe(&dir.source)),
        }
    }
}

/// A validated list of resolved inputs.
///
/// No two inputs share a filename, `.` is only used on its own, and no
/// input is placed inside an extracted directory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolvedInputs {
    files: Vec<ResolvedInput>,
}

impl ResolvedInputs {
    /// Validate a list of inputs.
    pub fn new(files: Vec<ResolvedInput>) -> Result<ResolvedInputs> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for file in &files {
            let target = file.filename().normalized();
            if !seen.insert(target.clone()) {
                duplicates.insert(target);
            }
        }
        if !duplicates.is_empty() {
            return Err(RunnerError::integrity(format!(
                "duplicate filenames in resolved inputs: {}",
                duplicates.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        if seen.contains(".") && files.len() > 1 {
            return Err(RunnerError::config(
                "the current directory `.` cannot coexist with other inputs",
            ));
        }

        for dir in files.iter().filter_map(|file| match file {
            ResolvedInput::Directory(dir) => Some(&dir.filename),
            _ => None,
        }) {
            if let Some(nested) = files.iter().find(|file| file.filename().is_inside(dir)) {
                return Err(RunnerError::config(format!(
                    "path {:?} conflicts with directory {:?}, which is extracted from an archive",
                    nested.filename().as_str(),
                    dir.as_str(),
                )));
            }
        }

        Ok(ResolvedInputs { files })
    }

    /// The inputs, in declaration order.
    pub fn files(&self) -> &[ResolvedInput] {
        &self.files
    }

    /// Keep only the input named `filename`. Matching nothing is an error.
    pub fn filter(self, filename: &str) -> Result<ResolvedInputs> {
        let files = self
            .files
            .into_iter()
            .filter(|file| file.filename().as_str() == filename)
            .collect::<Vec<_>>();
        if files.is_empty() {
            return Err(RunnerError::config(format!(
                "filter {:?} did not match any input files",
                filename
            )));
        }
        Ok(ResolvedInputs { files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::runner_error;
    use assert_matches::assert_matches;

    fn static_file(name: &str) -> ResolvedInput {
        ResolvedInput::Static(ResolvedStaticFile {
            filename: RelativePath::new(name).unwrap(),
            content: b"x".to_vec(),
        })
    }

    fn directory(name: &str) -> ResolvedInput {
        ResolvedInput::Directory(ResolvedDirectory {
            filename: RelativePath::new(name).unwrap(),
            source: FileSource::Local("/archives/a.zip".to_owned()),
            extract: ArchiveFormat::Zip,
            include_patterns: vec![],
            exclude_patterns: vec![],
            strip_root: false,
            checksum: None,
        })
    }

    #[test]
    fn duplicates_are_integrity_errors() {
        let err = ResolvedInputs::new(vec![static_file("a"), static_file("b"), static_file("a")]).unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Integrity(msg)) if msg.ends_with(": a"));
    }

    #[test]
    fn duplicates_are_found_after_normalizing() {
        let err = ResolvedInputs::new(vec![static_file("a"), static_file("./a")]).unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Integrity(msg)) if msg.ends_with(": a"));
        assert!(ResolvedInputs::new(vec![static_file("dir/a"), static_file("dir/./b")]).is_ok());
    }

    #[test]
    fn dot_must_be_alone() {
        assert!(ResolvedInputs::new(vec![directory(".")]).is_ok());
        assert!(ResolvedInputs::new(vec![directory("."), static_file("a")]).is_err());
    }

    #[test]
    fn nothing_may_live_inside_an_extracted_directory() {
        assert!(ResolvedInputs::new(vec![directory("data"), static_file("data2")]).is_ok());
        let err = ResolvedInputs::new(vec![directory("data"), static_file("data/x")]).unwrap_err();
        assert!(err.to_string().contains("conflicts with directory"));
    }

    #[test]
    fn filter_keeps_one_file_or_fails() {
        let inputs = ResolvedInputs::new(vec![static_file("a"), static_file("b")]).unwrap();
        assert_eq!(inputs.clone().filter("b").unwrap().files().len(), 1);
        assert!(inputs.filter("c").is_err());
    }
}
