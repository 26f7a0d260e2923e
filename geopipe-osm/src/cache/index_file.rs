use crate::OsmError;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Offset indexes and member→relation multimaps are flushed in blocks of
/// this many (key, value) pairs.
const FLUSH_COUNT: usize = 10_000_000;

/// Append-side of a sorted-on-load (u64 key → u64 value) index file.
/// Records are written in arrival order; the reader sorts.
pub struct IndexFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    elements: Vec<(u64, u64)>,
}

impl IndexFileWriter {
    pub fn create(path: &Path) -> Result<IndexFileWriter, OsmError> {
        let file = File::create(path).map_err(OsmError::io(path.display().to_string()))?;
        Ok(IndexFileWriter {
            path: path.to_owned(),
            writer: BufWriter::new(file),
            elements: Vec::with_capacity(FLUSH_COUNT.min(1 << 20)),
        })
    }

    pub fn add(&mut self, key: u64, value: u64) -> Result<(), OsmError> {
        if self.elements.len() > FLUSH_COUNT {
            self.write_all()?;
        }
        self.elements.push((key, value));
        Ok(())
    }

    pub fn write_all(&mut self) -> Result<(), OsmError> {
        for (key, value) in self.elements.drain(..) {
            self.writer
                .write_all(&key.to_le_bytes())
                .and_then(|()| self.writer.write_all(&value.to_le_bytes()))
                .map_err(OsmError::io(self.path.display().to_string()))?;
        }
        self.writer
            .flush()
            .map_err(OsmError::io(self.path.display().to_string()))
    }
}

/// Whole-file load of an index written by `IndexFileWriter`; rows sorted by
/// key for binary search, duplicate keys kept (multimap lookups scan the
/// equal range).
pub struct IndexFileReader {
    elements: Vec<(u64, u64)>,
}

impl IndexFileReader {
    pub fn open(path: &Path) -> Result<IndexFileReader, OsmError> {
        let mut file = File::open(path).map_err(OsmError::io(path.display().to_string()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(OsmError::io(path.display().to_string()))?;
        if data.len() % 16 != 0 {
            return Err(OsmError::Configuration(format!(
                "damaged index file {}: size {} is not a whole number of records",
                path.display(),
                data.len()
            )));
        }

        log::info!("offsets reading is started for file {}", path.display());
        let mut elements = Vec::with_capacity(data.len() / 16);
        for record in data.chunks_exact(16) {
            let key = u64::from_le_bytes(record[..8].try_into().unwrap());
            let value = u64::from_le_bytes(record[8..].try_into().unwrap());
            elements.push((key, value));
        }
        elements.sort_unstable();
        log::info!("offsets reading is finished");
        Ok(IndexFileReader { elements })
    }

    pub fn get(&self, key: u64) -> Option<u64> {
        let i = self.elements.partition_point(|&(k, _)| k < key);
        self.elements
            .get(i)
            .filter(|&&(k, _)| k == key)
            .map(|&(_, v)| v)
    }

    pub fn for_each_value<F: FnMut(u64)>(&self, key: u64, mut f: F) {
        let start = self.elements.partition_point(|&(k, _)| k < key);
        for &(k, v) in &self.elements[start..] {
            if k != key {
                break;
            }
            f(v);
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multimap_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ways.id2rel");

        let mut writer = IndexFileWriter::create(&path).unwrap();
        writer.add(10, 100).unwrap();
        writer.add(5, 50).unwrap();
        writer.add(10, 101).unwrap();
        writer.write_all().unwrap();
        drop(writer);

        let reader = IndexFileReader::open(&path).unwrap();
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.get(5), Some(50));
        assert_eq!(reader.get(6), None);

        let mut values = Vec::new();
        reader.for_each_value(10, |v| values.push(v));
        assert_eq!(values, vec![100, 101]);
    }
}
