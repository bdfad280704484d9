//! The `chunks.yml` file listing the chunk directories of a work directory.

use crate::prelude::*;
use crate::specs::{read_yaml, write_yaml};

/// The name of the chunks file inside a work directory.
pub const CHUNKS_FILE_NAME: &str = "chunks.yml";

/// The chunks of a work directory, in processing order.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChunksFile {
    /// Chunk directories, relative to the work directory.
    pub chunks: Vec<PathBuf>,
}

impl ChunksFile {
    /// Read `chunks.yml` from `work_dir`.
    pub fn read(work_dir: &Path) -> Result<ChunksFile> {
        read_yaml(&work_dir.join(CHUNKS_FILE_NAME))
    }

    /// Write `chunks.yml` into `work_dir`.
    pub fn write(&self, work_dir: &Path) -> Result<()> {
        write_yaml(&work_dir.join(CHUNKS_FILE_NAME), self)
    }

    /// Read `chunks.yml`, or if there is none, derive it from the
    /// subdirectories of `work_dir` and write it.
    pub fn read_or_discover(work_dir: &Path) -> Result<ChunksFile> {
        if work_dir.join(CHUNKS_FILE_NAME).exists() {
            return ChunksFile::read(work_dir);
        }
        let chunks = ChunksFile::discover(work_dir)?;
        info!(
            "no {} in {}, found {} chunk directories",
            CHUNKS_FILE_NAME,
            work_dir.display(),
            chunks.chunks.len()
        );
        chunks.write(work_dir)?;
        Ok(chunks)
    }

    /// Find the immediate subdirectories of `work_dir` which contain an
    /// `inputs.yml`, sorted by name.
    pub fn discover(work_dir: &Path) -> Result<ChunksFile> {
        let mut chunks = vec![];
        let entries = fs::read_dir(work_dir)
            .with_context(|| format!("could not list {}", work_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if entry.path().join("inputs.yml").is_file() {
                chunks.push(PathBuf::from(entry.file_name()));
            }
        }
        if chunks.is_empty() {
            return Err(RunnerError::chunk(format!(
                "no chunks found in {}",
                work_dir.display()
            )));
        }
        chunks.sort();
        Ok(ChunksFile { chunks })
    }

    /// The chunk directories, resolved against `work_dir`. Each must
    /// contain an `inputs.yml`.
    pub fn chunk_dirs(&self, work_dir: &Path) -> Result<Vec<PathBuf>> {
        self.chunks
            .iter()
            .map(|chunk| {
                let dir = work_dir.join(chunk);
                if !dir.join("inputs.yml").is_file() {
                    return Err(RunnerError::chunk(format!(
                        "chunk directory {} has no inputs.yml",
                        dir.display()
                    )));
                }
                Ok(dir)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::runner_error;
    use assert_matches::assert_matches;

    #[test]
    fn discovery_sorts_chunks_with_inputs() {
        let dir = tempfile::tempdir().unwrap();
        for name in &["b", "a", "c"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("b/inputs.yml"), "inputs: []\n").unwrap();
        fs::write(dir.path().join("a/inputs.yml"), "inputs: []\n").unwrap();

        let chunks = ChunksFile::read_or_discover(dir.path()).unwrap();
        assert_eq!(chunks.chunks, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(ChunksFile::read(dir.path()).unwrap(), chunks);
        assert_eq!(
            chunks.chunk_dirs(dir.path()).unwrap(),
            vec![dir.path().join("a"), dir.path().join("b")]
        );
    }

    #[test]
    fn empty_work_directories_are_chunk_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChunksFile::read_or_discover(dir.path()).unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Chunk(_)));
        assert!(!dir.path().join(CHUNKS_FILE_NAME).exists());
    }

    #[test]
    fn chunks_without_inputs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = ChunksFile {
            chunks: vec![PathBuf::from("missing")],
        };
        let err = chunks.chunk_dirs(dir.path()).unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Chunk(_)));
    }
}
