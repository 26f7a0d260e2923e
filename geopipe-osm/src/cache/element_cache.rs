use super::index_file::{IndexFileReader, IndexFileWriter};
use crate::OsmError;
use geopipe_core::coding::{read_varuint, write_varuint};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const OFFSET_EXT: &str = ".offs";

/// Variable-length element records keyed by id through a parallel offset
/// index. Writes are append-only; records for the same id may repeat, the
/// sorted offset index resolves to the first occurrence.
pub struct ElementCacheWriter {
    path: PathBuf,
    data: BufWriter<File>,
    current_offset: u64,
    offsets: IndexFileWriter,
}

impl ElementCacheWriter {
    pub fn create(path: &Path) -> Result<ElementCacheWriter, OsmError> {
        let file = File::create(path).map_err(OsmError::io(path.display().to_string()))?;
        let offsets = IndexFileWriter::create(&offset_path(path))?;
        Ok(ElementCacheWriter {
            path: path.to_owned(),
            data: BufWriter::with_capacity(10 * 1024 * 1024, file),
            current_offset: 0,
            offsets,
        })
    }

    pub fn write(&mut self, id: u64, payload: &[u8]) -> Result<(), OsmError> {
        self.offsets.add(id, self.current_offset)?;

        let mut header = Vec::with_capacity(10);
        write_varuint(&mut header, payload.len() as u64)?;
        self.data
            .write_all(&header)
            .and_then(|()| self.data.write_all(payload))
            .map_err(OsmError::io(self.path.display().to_string()))?;
        self.current_offset += (header.len() + payload.len()) as u64;
        Ok(())
    }

    pub fn save_offsets(&mut self) -> Result<(), OsmError> {
        self.data
            .flush()
            .map_err(OsmError::io(self.path.display().to_string()))?;
        self.offsets.write_all()
    }
}

pub struct ElementCacheReader {
    mmap: Option<Mmap>,
    offsets: IndexFileReader,
}

impl ElementCacheReader {
    pub fn open(path: &Path) -> Result<ElementCacheReader, OsmError> {
        let offsets = IndexFileReader::open(&offset_path(path))?;
        let file = File::open(path).map_err(OsmError::io(path.display().to_string()))?;
        let len = file
            .metadata()
            .map_err(OsmError::io(path.display().to_string()))?
            .len();
        let mmap = if len == 0 {
            None
        } else {
            let mmap = unsafe { Mmap::map(&file) }.map_err(OsmError::io("element cache mmap"))?;
            geopipe_core::readahead::spawn_willneed_hint(&mmap);
            Some(mmap)
        };
        Ok(ElementCacheReader { mmap, offsets })
    }

    pub fn read(&self, id: u64) -> Result<Option<&[u8]>, OsmError> {
        let Some(offset) = self.offsets.get(id) else {
            return Ok(None);
        };
        let data = self
            .mmap
            .as_deref()
            .ok_or_else(|| OsmError::Configuration("offset into empty element cache".into()))?;
        let mut cursor = data
            .get(offset as usize..)
            .ok_or_else(|| OsmError::Configuration(format!("offset {offset} beyond cache")))?;
        let before = cursor.len();
        let len = read_varuint(&mut cursor)? as usize;
        let header = before - cursor.len();
        let start = offset as usize + header;
        let payload = data
            .get(start..start + len)
            .ok_or_else(|| OsmError::Configuration(format!("record at {offset} truncated")))?;
        Ok(Some(payload))
    }
}

fn offset_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(OFFSET_EXT);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WayElement;

    #[test]
    fn way_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ways.dat");

        let mut way = WayElement::new(273127);
        way.nodes = vec![0, 1, 2, 3, 0xFFFF_FFFF, u64::MAX];
        let mut payload = Vec::new();
        way.write_to(&mut payload).unwrap();

        let mut writer = ElementCacheWriter::create(&path).unwrap();
        writer.write(way.id, &payload).unwrap();
        writer.save_offsets().unwrap();
        drop(writer);

        let reader = ElementCacheReader::open(&path).unwrap();
        let bytes = reader.read(273127).unwrap().unwrap();
        let mut restored = WayElement::new(273127);
        restored.read_from(&mut &bytes[..]).unwrap();
        assert_eq!(restored.nodes, way.nodes);

        assert!(reader.read(1).unwrap().is_none());
    }
}
