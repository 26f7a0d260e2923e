use crate::CoreError;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Collects per-thread temporary files and appends them to a single target
/// on `merge`, deleting each part afterwards. Parts that never materialized
/// are skipped silently.
pub struct FilesMerger {
    target: PathBuf,
    parts: Vec<PathBuf>,
}

impl FilesMerger {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        FilesMerger {
            target: target.into(),
            parts: Vec::new(),
        }
    }

    pub fn defer_merge_and_delete(&mut self, part: impl Into<PathBuf>) {
        self.parts.push(part.into());
    }

    pub fn merge(&mut self) -> Result<(), CoreError> {
        let mut target = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.target)
            .map_err(CoreError::io(self.target.display().to_string()))?;

        for part in self.parts.drain(..) {
            if !part.exists() {
                continue;
            }
            append_file(&part, &mut target)?;
            std::fs::remove_file(&part).map_err(CoreError::io(part.display().to_string()))?;
        }
        Ok(())
    }
}

fn append_file(part: &Path, target: &mut File) -> Result<(), CoreError> {
    let mut source = File::open(part).map_err(CoreError::io(part.display().to_string()))?;
    io::copy(&mut source, target)
        .map(|_| ())
        .map_err(CoreError::io(part.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn merges_and_deletes_parts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("merged");
        let part1 = dir.path().join("part1");
        let part2 = dir.path().join("part2");
        std::fs::write(&part1, b"one").unwrap();
        std::fs::write(&part2, b"two").unwrap();

        let mut merger = FilesMerger::new(&target);
        merger.defer_merge_and_delete(&part1);
        merger.defer_merge_and_delete(&part2);
        merger.defer_merge_and_delete(dir.path().join("never-created"));
        merger.merge().unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"onetwo");
        assert!(!part1.exists());
        assert!(!part2.exists());
    }

    #[test]
    fn appends_to_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("merged");
        let mut f = File::create(&target).unwrap();
        f.write_all(b"head;").unwrap();
        drop(f);

        let part = dir.path().join("part");
        std::fs::write(&part, b"tail").unwrap();
        let mut merger = FilesMerger::new(&target);
        merger.defer_merge_and_delete(&part);
        merger.merge().unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"head;tail");
    }
}
