//! Deciding whether a staged input needs to be fetched again.

use std::io;

use super::resolved::{ResolvedDirectory, ResolvedFile, ResolvedInput, ResolvedStaticFile};
use crate::checksums::{checksums_match, md5_file};
use crate::prelude::*;

/// The state of a staged input.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum IntegrityState {
    /// Nothing exists at the target path.
    Missing,
    /// Something exists, but there is nothing to verify it against.
    NotChecked,
    /// The contents are verified to be right.
    Correct,
    /// The contents are wrong, or could not be read.
    Incorrect,
}

impl IntegrityState {
    /// Does something exist at the target path?
    pub fn exists(self) -> bool {
        self != IntegrityState::Missing
    }

    /// Is the input usable as it is?
    pub fn is_usable(self) -> bool {
        matches!(self, IntegrityState::Correct | IntegrityState::NotChecked)
    }
}

impl fmt::Display for IntegrityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntegrityState::Missing => "Missing",
            IntegrityState::NotChecked => "NotChecked",
            IntegrityState::Correct => "Correct",
            IntegrityState::Incorrect => "Incorrect",
        };
        s.fmt(f)
    }
}

/// Check the input staged at `local_path`. Never writes anything.
pub fn check_integrity(input: &ResolvedInput, local_path: &Path) -> IntegrityState {
    if !local_path.exists() {
        return IntegrityState::Missing;
    }
    let checked = match input {
        ResolvedInput::File(file) => check_file(file, local_path),
        ResolvedInput::Static(file) => check_static_file(file, local_path),
        ResolvedInput::Directory(dir) => check_directory(dir, local_path),
    };
    checked.unwrap_or_else(|err| {
        debug!("could not check {}: {}", local_path.display(), err);
        IntegrityState::Incorrect
    })
}

fn check_file(file: &ResolvedFile, local_path: &Path) -> Result<IntegrityState> {
    match &file.checksum {
        None => Ok(IntegrityState::NotChecked),
        Some(expected) => Ok(verdict(checksums_match(expected, &md5_file(local_path)?))),
    }
}

fn check_static_file(file: &ResolvedStaticFile, local_path: &Path) -> Result<IntegrityState> {
    if !local_path.is_file() {
        return Ok(IntegrityState::Incorrect);
    }
    let existing = fs::read(local_path)?;
    Ok(verdict(existing == file.content))
}

fn check_directory(dir: &ResolvedDirectory, local_path: &Path) -> Result<IntegrityState> {
    if !local_path.is_dir() || is_empty_dir(local_path)? {
        return Ok(IntegrityState::Incorrect);
    }
    match &dir.checksum {
        None => Ok(IntegrityState::NotChecked),
        Some(expected) => {
            let archive = archive_path(dir, local_path);
            if !archive.is_file() {
                return Ok(IntegrityState::Incorrect);
            }
            Ok(verdict(checksums_match(expected, &md5_file(&archive)?)))
        }
    }
}

/// Where the archive of `dir` is kept, given where `dir` is extracted.
/// Archives extracted into `.` are kept inside it.
pub(crate) fn archive_path(dir: &ResolvedDirectory, local_path: &Path) -> PathBuf {
    if dir.filename.as_str() == "." {
        return local_path.join(".archive.zip");
    }
    let mut name = local_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| dir.filename.file_name().into());
    name.push(".zip");
    local_path.with_file_name(name)
}

fn is_empty_dir(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

fn verdict(ok: bool) -> IntegrityState {
    if ok {
        IntegrityState::Correct
    } else {
        IntegrityState::Incorrect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::md5_bytes;
    use crate::specs::inputs::{ArchiveFormat, FileSource};
    use crate::specs::RelativePath;

    fn file(checksum: Option<String>) -> ResolvedInput {
        ResolvedInput::File(ResolvedFile {
            filename: RelativePath::new("a.raw").unwrap(),
            source: FileSource::Local("/data/a.raw".to_owned()),
            link: false,
            checksum,
        })
    }

    fn directory(checksum: Option<String>) -> ResolvedInput {
        ResolvedInput::Directory(ResolvedDirectory {
            filename: RelativePath::new("unpacked").unwrap(),
            source: FileSource::Local("/data/a.zip".to_owned()),
            extract: ArchiveFormat::Zip,
            include_patterns: vec![],
            exclude_patterns: vec![],
            strip_root: false,
            checksum,
        })
    }

    #[test]
    fn files_are_checked_against_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.raw");
        assert_eq!(check_integrity(&file(None), &path), IntegrityState::Missing);
        fs::write(&path, b"data").unwrap();
        assert_eq!(check_integrity(&file(None), &path), IntegrityState::NotChecked);
        assert_eq!(
            check_integrity(&file(Some(md5_bytes(b"data"))), &path),
            IntegrityState::Correct
        );
        assert_eq!(
            check_integrity(&file(Some(md5_bytes(b"other"))), &path),
            IntegrityState::Incorrect
        );
    }

    #[test]
    fn static_files_are_compared_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.yml");
        let input = ResolvedInput::Static(ResolvedStaticFile {
            filename: RelativePath::new("x.yml").unwrap(),
            content: b"a: 1\n".to_vec(),
        });
        fs::write(&path, b"a: 2\n").unwrap();
        assert_eq!(check_integrity(&input, &path), IntegrityState::Incorrect);
        fs::write(&path, b"a: 1\n").unwrap();
        assert_eq!(check_integrity(&input, &path), IntegrityState::Correct);
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert_eq!(check_integrity(&input, &path), IntegrityState::Incorrect);
    }

    #[test]
    fn directories_need_contents_and_a_matching_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unpacked");
        fs::create_dir(&path).unwrap();
        assert_eq!(check_integrity(&directory(None), &path), IntegrityState::Incorrect);
        fs::write(path.join("member.txt"), b"m").unwrap();
        assert_eq!(check_integrity(&directory(None), &path), IntegrityState::NotChecked);

        let checksum = Some(md5_bytes(b"zip bytes"));
        assert_eq!(check_integrity(&directory(checksum.clone()), &path), IntegrityState::Incorrect);
        fs::write(dir.path().join("unpacked.zip"), b"zip bytes").unwrap();
        assert_eq!(check_integrity(&directory(checksum), &path), IntegrityState::Correct);
    }
}
