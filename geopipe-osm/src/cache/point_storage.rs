use crate::OsmError;
use memmap2::{Mmap, MmapMut};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Projected coordinates packed to 8 bytes: both axes scaled by 1e7 into
/// i32. (0, 0) marks an absent slot, so the one node at the exact origin is
/// treated as missing; the planet has no such node.
const COORD_SCALE: f64 = 1e7;

/// An estimation: OSM passed 4.1 billion node ids long ago, so the raw-mem
/// variant reserves 2^33 slots.
const MAX_NODES_IN_OSM: u64 = 1 << 33;

const SHORT_EXTENSION: &str = ".short";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStorageType {
    /// Fixed 8-byte slots indexed by id; seek-write, mmap-read.
    File,
    /// Append-only (id, y, x) records; in-memory hash on load.
    Index,
    /// Mmap-backed slots with a ~64 GiB virtual reservation.
    Memory,
}

impl std::str::FromStr for NodeStorageType {
    type Err = OsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(NodeStorageType::File),
            "map" => Ok(NodeStorageType::Index),
            "mem" => Ok(NodeStorageType::Memory),
            other => Err(OsmError::Configuration(format!(
                "unknown node storage '{other}', expected raw, map or mem"
            ))),
        }
    }
}

fn pack(y: f64, x: f64) -> Result<[u8; 8], OsmError> {
    let y64 = (y * COORD_SCALE).round() as i64;
    let x64 = (x * COORD_SCALE).round() as i64;
    let y32 = i32::try_from(y64)
        .map_err(|_| OsmError::Configuration(format!("coordinate {y} out of 32-bit range")))?;
    let x32 = i32::try_from(x64)
        .map_err(|_| OsmError::Configuration(format!("coordinate {x} out of 32-bit range")))?;
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&y32.to_le_bytes());
    buf[4..].copy_from_slice(&x32.to_le_bytes());
    Ok(buf)
}

fn unpack(buf: &[u8]) -> Option<(f64, f64)> {
    let y = i32::from_le_bytes(buf[..4].try_into().unwrap());
    let x = i32::from_le_bytes(buf[4..8].try_into().unwrap());
    if y == 0 && x == 0 {
        return None;
    }
    Some((f64::from(y) / COORD_SCALE, f64::from(x) / COORD_SCALE))
}

/// All three variants share this contract; batch writes serialize behind the
/// caller's mutex.
pub trait PointStorageWriter: Send {
    fn add_point(&mut self, id: u64, y: f64, x: f64) -> Result<(), OsmError>;

    fn add_points(&mut self, nodes: &[(u64, f64, f64)]) -> Result<(), OsmError> {
        for &(id, y, x) in nodes {
            self.add_point(id, y, x)?;
        }
        Ok(())
    }

    fn processed_points(&self) -> u64;

    fn finish(&mut self) -> Result<(), OsmError> {
        Ok(())
    }
}

pub trait PointStorageReader: Send + Sync {
    /// Projected (y, x) of a node, or None if the id was never stored.
    fn get_point(&self, id: u64) -> Option<(f64, f64)>;
}

// Raw file: one 8-byte slot per id, written in place.
struct RawFileWriter {
    file: File,
    processed: u64,
}

impl RawFileWriter {
    fn open(path: &Path) -> Result<RawFileWriter, OsmError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)
            .map_err(OsmError::io(path.display().to_string()))?;
        Ok(RawFileWriter { file, processed: 0 })
    }
}

impl PointStorageWriter for RawFileWriter {
    fn add_point(&mut self, id: u64, y: f64, x: f64) -> Result<(), OsmError> {
        let buf = pack(y, x)?;
        self.file
            .write_all_at(&buf, id * 8)
            .map_err(OsmError::io("raw point write"))?;
        self.processed += 1;
        Ok(())
    }

    fn processed_points(&self) -> u64 {
        self.processed
    }
}

struct RawFileReader {
    mmap: Mmap,
}

impl RawFileReader {
    fn open(path: &Path) -> Result<RawFileReader, OsmError> {
        let file = File::open(path).map_err(OsmError::io(path.display().to_string()))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(OsmError::io("raw point mmap"))?;
        geopipe_core::readahead::spawn_willneed_hint(&mmap);
        Ok(RawFileReader { mmap })
    }
}

impl PointStorageReader for RawFileReader {
    fn get_point(&self, id: u64) -> Option<(f64, f64)> {
        let start = (id * 8) as usize;
        let slot = self.mmap.get(start..start + 8)?;
        let point = unpack(slot);
        if point.is_none() {
            log::error!("node with id = {id} not found");
        }
        point
    }
}

// Map file: append-only (id, y, x) records, hashed on load.
struct MapFileWriter {
    writer: BufWriter<File>,
    processed: u64,
}

impl MapFileWriter {
    fn open(path: &Path) -> Result<MapFileWriter, OsmError> {
        let path = short_path(path);
        let file = File::create(&path).map_err(OsmError::io(path.display().to_string()))?;
        Ok(MapFileWriter {
            writer: BufWriter::new(file),
            processed: 0,
        })
    }
}

impl PointStorageWriter for MapFileWriter {
    fn add_point(&mut self, id: u64, y: f64, x: f64) -> Result<(), OsmError> {
        let coords = pack(y, x)?;
        self.writer
            .write_all(&id.to_le_bytes())
            .and_then(|()| self.writer.write_all(&coords))
            .map_err(OsmError::io("map point write"))?;
        self.processed += 1;
        Ok(())
    }

    fn processed_points(&self) -> u64 {
        self.processed
    }

    fn finish(&mut self) -> Result<(), OsmError> {
        self.writer.flush().map_err(OsmError::io("map point flush"))
    }
}

struct MapFileReader {
    map: HashMap<u64, [u8; 8]>,
}

impl MapFileReader {
    fn open(path: &Path) -> Result<MapFileReader, OsmError> {
        let path = short_path(path);
        log::info!("nodes reading is started");
        let file = File::open(&path).map_err(OsmError::io(path.display().to_string()))?;
        let mut reader = BufReader::new(file);
        let mut map = HashMap::new();
        let mut record = [0u8; 16];
        loop {
            match reader.read_exact(&mut record) {
                Ok(()) => {
                    let id = u64::from_le_bytes(record[..8].try_into().unwrap());
                    map.insert(id, record[8..].try_into().unwrap());
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(OsmError::io("map point read")(e)),
            }
        }
        log::info!("nodes reading is finished");
        Ok(MapFileReader { map })
    }
}

impl PointStorageReader for MapFileReader {
    fn get_point(&self, id: u64) -> Option<(f64, f64)> {
        let slot = self.map.get(&id)?;
        let point = unpack(slot);
        if point.is_none() {
            log::error!("inconsistent map storage: node {id} must exist but has empty coords");
        }
        point
    }
}

// Raw mem: the raw-file layout behind a large writable mapping.
struct RawMemWriter {
    mmap: MmapMut,
    processed: u64,
}

impl RawMemWriter {
    fn open(path: &Path) -> Result<RawMemWriter, OsmError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(OsmError::io(path.display().to_string()))?;
        file.set_len(MAX_NODES_IN_OSM * 8)
            .map_err(OsmError::io("raw-mem reserve"))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(OsmError::io("raw-mem mmap"))?;
        // Slots are filled in ascending id order; let the kernel write dirty
        // pages back sequentially.
        let _ = mmap.advise(memmap2::Advice::Sequential);
        Ok(RawMemWriter { mmap, processed: 0 })
    }
}

impl PointStorageWriter for RawMemWriter {
    fn add_point(&mut self, id: u64, y: f64, x: f64) -> Result<(), OsmError> {
        if id >= MAX_NODES_IN_OSM {
            return Err(OsmError::NodeIdOutOfRange(id));
        }
        let buf = pack(y, x)?;
        let start = (id * 8) as usize;
        self.mmap[start..start + 8].copy_from_slice(&buf);
        self.processed += 1;
        Ok(())
    }

    fn processed_points(&self) -> u64 {
        self.processed
    }

    fn finish(&mut self) -> Result<(), OsmError> {
        self.mmap
            .flush_async()
            .map_err(OsmError::io("raw-mem msync"))
    }
}

struct RawMemReader {
    data: Vec<u8>,
}

impl RawMemReader {
    fn open(path: &Path) -> Result<RawMemReader, OsmError> {
        let mut file = File::open(path).map_err(OsmError::io(path.display().to_string()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(OsmError::io("raw-mem load"))?;
        Ok(RawMemReader { data })
    }
}

impl PointStorageReader for RawMemReader {
    fn get_point(&self, id: u64) -> Option<(f64, f64)> {
        let start = (id * 8) as usize;
        let slot = self.data.get(start..start + 8)?;
        let point = unpack(slot);
        if point.is_none() {
            log::error!("node with id = {id} not found");
        }
        point
    }
}

fn short_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(SHORT_EXTENSION);
    PathBuf::from(name)
}

pub fn create_point_storage_writer(
    storage: NodeStorageType,
    path: &Path,
) -> Result<Box<dyn PointStorageWriter>, OsmError> {
    Ok(match storage {
        NodeStorageType::File => Box::new(RawFileWriter::open(path)?),
        NodeStorageType::Index => Box::new(MapFileWriter::open(path)?),
        NodeStorageType::Memory => Box::new(RawMemWriter::open(path)?),
    })
}

pub fn create_point_storage_reader(
    storage: NodeStorageType,
    path: &Path,
) -> Result<Box<dyn PointStorageReader>, OsmError> {
    Ok(match storage {
        NodeStorageType::File => Box::new(RawFileReader::open(path)?),
        NodeStorageType::Index => Box::new(MapFileReader::open(path)?),
        NodeStorageType::Memory => Box::new(RawMemReader::open(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(storage: NodeStorageType) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.dat");

        let mut writer = create_point_storage_writer(storage, &path).unwrap();
        writer.add_point(1, 55.75, 37.61).unwrap();
        writer.add_point(100, -33.86, 151.2).unwrap();
        writer
            .add_points(&[(7, 21.55, -80.11), (8, 0.5, 0.5)])
            .unwrap();
        assert_eq!(writer.processed_points(), 4);
        writer.finish().unwrap();
        drop(writer);

        let reader = create_point_storage_reader(storage, &path).unwrap();
        let (y, x) = reader.get_point(1).unwrap();
        assert!((y - 55.75).abs() < 1e-6 && (x - 37.61).abs() < 1e-6);
        let (y, x) = reader.get_point(100).unwrap();
        assert!((y + 33.86).abs() < 1e-6 && (x - 151.2).abs() < 1e-6);
        assert!(reader.get_point(7).is_some());
        assert!(reader.get_point(2).is_none());
    }

    #[test]
    fn raw_file_round_trip() {
        round_trip(NodeStorageType::File);
    }

    #[test]
    fn map_file_round_trip() {
        round_trip(NodeStorageType::Index);
    }

    #[test]
    fn storage_type_parsing() {
        assert_eq!("raw".parse::<NodeStorageType>().unwrap(), NodeStorageType::File);
        assert_eq!("map".parse::<NodeStorageType>().unwrap(), NodeStorageType::Index);
        assert_eq!("mem".parse::<NodeStorageType>().unwrap(), NodeStorageType::Memory);
        assert!("heap".parse::<NodeStorageType>().is_err());
    }
}
