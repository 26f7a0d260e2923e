use crate::GeneratorError;
use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use geopipe_core::cell::{CellId, REGIONS_DEPTH_LEVELS};
use geopipe_core::coding::{read_u64, read_varuint, write_u64, write_varuint};
use geopipe_core::index::IntervalIndex;
use geopipe_core::kv::{KeyValue, KeyValueStorage};
use geopipe_core::mercator;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exact region outlines, the companion of the regions covering index: the
/// index narrows a point to candidate ids, the borders decide membership.
#[derive(Default)]
pub struct Borders {
    polygons: HashMap<u64, MultiPolygon<f64>>,
}

impl Borders {
    pub fn insert(&mut self, id: u64, polygons: MultiPolygon<f64>) {
        self.polygons.insert(id, polygons);
    }

    pub fn is_point_inside(&self, id: u64, point: Coord<f64>) -> bool {
        self.polygons
            .get(&id)
            .is_some_and(|mp| mp.contains(&Point(point)))
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), GeneratorError> {
        let file = File::create(path).map_err(GeneratorError::io(path.display().to_string()))?;
        let mut out = BufWriter::new(file);
        write_varuint(&mut out, self.polygons.len() as u64)?;
        for (id, multi) in &self.polygons {
            write_u64(&mut out, *id)?;
            write_varuint(&mut out, multi.0.len() as u64)?;
            for polygon in &multi.0 {
                write_ring(&mut out, polygon.exterior())?;
                write_varuint(&mut out, polygon.interiors().len() as u64)?;
                for hole in polygon.interiors() {
                    write_ring(&mut out, hole)?;
                }
            }
        }
        out.flush()
            .map_err(GeneratorError::io(path.display().to_string()))
    }

    pub fn load(path: &Path) -> Result<Borders, GeneratorError> {
        let file = File::open(path).map_err(GeneratorError::io(path.display().to_string()))?;
        let mut source = BufReader::new(file);
        let count = read_varuint(&mut source)? as usize;
        let mut polygons = HashMap::with_capacity(count);
        for _ in 0..count {
            let id = read_u64(&mut source)?;
            let polygon_count = read_varuint(&mut source)? as usize;
            let mut multi = Vec::with_capacity(polygon_count);
            for _ in 0..polygon_count {
                let exterior = read_ring(&mut source)?;
                let holes = read_varuint(&mut source)? as usize;
                let mut interiors = Vec::with_capacity(holes);
                for _ in 0..holes {
                    interiors.push(read_ring(&mut source)?);
                }
                multi.push(Polygon::new(exterior, interiors));
            }
            polygons.insert(id, MultiPolygon::new(multi));
        }
        Ok(Borders { polygons })
    }
}

fn write_ring<W: Write>(sink: &mut W, ring: &LineString<f64>) -> Result<(), GeneratorError> {
    write_varuint(sink, ring.0.len() as u64)?;
    for p in &ring.0 {
        write_u64(sink, p.x.to_bits())?;
        write_u64(sink, p.y.to_bits())?;
    }
    Ok(())
}

fn read_ring<R: Read>(source: &mut R) -> Result<LineString<f64>, GeneratorError> {
    let count = read_varuint(source)? as usize;
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let x = f64::from_bits(read_u64(source)?);
        let y = f64::from_bits(read_u64(source)?);
        points.push(Coord { x, y });
    }
    Ok(LineString(points))
}

pub fn borders_path(index_path: &Path) -> PathBuf {
    let mut name = index_path.as_os_str().to_owned();
    name.push(".borders");
    PathBuf::from(name)
}

/// Point → region resolution over the regions artifacts: covering index for
/// candidates, KV storage for ranks and parents, borders for the exact test.
pub struct RegionInfoGetter {
    index: IntervalIndex<Mmap>,
    storage: KeyValueStorage,
    borders: Borders,
}

impl RegionInfoGetter {
    pub fn open(index_path: &Path, kv_path: &Path) -> Result<RegionInfoGetter, GeneratorError> {
        Ok(RegionInfoGetter {
            index: IntervalIndex::open(index_path)?,
            storage: KeyValueStorage::open(kv_path)?,
            borders: Borders::load(&borders_path(index_path))?,
        })
    }

    pub fn storage(&self) -> &KeyValueStorage {
        &self.storage
    }

    pub fn search_objects_in_index(&self, point: Coord<f64>) -> Vec<u64> {
        search_at_point(&self.index, point, REGIONS_DEPTH_LEVELS)
    }

    pub fn find_deepest(&self, point: Coord<f64>) -> Option<KeyValue> {
        self.find_deepest_matching(point, |_| true)
    }

    /// Deepest region containing the point and accepted by `selector`.
    pub fn find_deepest_matching<F>(&self, point: Coord<f64>, selector: F) -> Option<KeyValue>
    where
        F: Fn(&KeyValue) -> bool,
    {
        let ids = self.search_objects_in_index(point);

        let mut by_rank: Vec<(i64, KeyValue)> = Vec::with_capacity(ids.len());
        for id in ids {
            match self.storage.find(id) {
                Some(value) => by_rank.push((rank_of(&value), (id, value))),
                None => log::warn!("id {id:X} not found in region key-value storage"),
            }
        }
        by_rank.sort_by_key(|(rank, (id, _))| (*rank, *id));

        // Exact border checks are the expensive part; a child that passed
        // vouches for its parent chain through dref.
        let mut border_check_skip: Option<u64> = None;
        for (_, kv) in by_rank.into_iter().rev() {
            let (id, value) = &kv;
            if border_check_skip != Some(*id) && !self.borders.is_point_inside(*id, point) {
                continue;
            }
            if selector(&kv) {
                return Some(kv);
            }
            border_check_skip = dref_of(value);
        }
        None
    }
}

pub fn search_at_point(index: &IntervalIndex<Mmap>, point: Coord<f64>, depth: usize) -> Vec<u64> {
    let grid = mercator::to_cell_grid(point, depth);
    let leaf = CellId::leaf_at(grid, depth);
    let mut ids = Vec::new();
    for code in leaf.ancestor_codes(depth) {
        let _ = index.for_each_at_key(code, &mut |value| ids.push(value));
    }
    ids.sort_unstable();
    ids.dedup();
    ids
}

pub fn rank_of(value: &Arc<serde_json::Value>) -> i64 {
    value["properties"]["rank"].as_i64().unwrap_or(0)
}

pub fn dref_of(value: &Arc<serde_json::Value>) -> Option<u64> {
    let dref = value["properties"]["dref"].as_str()?;
    u64::from_str_radix(dref, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn borders_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.idx.borders");

        let mut borders = Borders::default();
        borders.insert(
            7,
            MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 0.0, y: 10.0),
                (x: 0.0, y: 0.0),
            ]]),
        );
        borders.save(&path).unwrap();

        let restored = Borders::load(&path).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.is_point_inside(7, Coord { x: 5.0, y: 5.0 }));
        assert!(!restored.is_point_inside(7, Coord { x: 15.0, y: 5.0 }));
        assert!(!restored.is_point_inside(8, Coord { x: 5.0, y: 5.0 }));
    }
}
