use geo::Coord;
use geopipe_core::cell::GEO_OBJECTS_DEPTH_LEVELS;
use geopipe_core::index::IntervalIndex;
use memmap2::Mmap;
use std::collections::HashMap;
use std::sync::Mutex;

/// Address facts cached for one geo object while the KV is being written.
#[derive(Debug, Clone, Default)]
pub struct GeoObjectData {
    pub street: String,
    pub house: String,
    pub region_id: u64,
}

/// Shared state of the geo-objects stage: the temporary covering index over
/// all candidate objects plus the id → address-facts cache filled by the
/// first pass.
pub struct GeoObjectMaintainer {
    index: IntervalIndex<Mmap>,
    geo_data: HashMap<u64, GeoObjectData>,
}

impl GeoObjectMaintainer {
    pub fn new(index: IntervalIndex<Mmap>) -> GeoObjectMaintainer {
        GeoObjectMaintainer {
            index,
            geo_data: HashMap::new(),
        }
    }

    pub fn set_geo_data(&mut self, geo_data: HashMap<u64, GeoObjectData>) {
        self.geo_data = geo_data;
    }

    pub fn size(&self) -> usize {
        self.geo_data.len()
    }

    /// Candidate object ids at a point, in index order.
    pub fn search_ids_at_point(&self, point: Coord<f64>) -> Vec<u64> {
        crate::regions::info_getter::search_at_point(&self.index, point, GEO_OBJECTS_DEPTH_LEVELS)
    }

    pub fn get_geo_data(&self, id: u64) -> Option<&GeoObjectData> {
        self.geo_data.get(&id)
    }

    /// First object at the point matching `pred`.
    pub fn search_id_of_first_matched_object<F>(&self, point: Coord<f64>, pred: F) -> Option<u64>
    where
        F: Fn(u64) -> bool,
    {
        self.search_ids_at_point(point).into_iter().find(|&id| pred(id))
    }
}

/// Per-thread buffered insert into a shared map: values batch locally and
/// flush under a try-lock at the soft limit, a hard lock at the forced one.
pub struct BufferedMapUpdater<'a, V> {
    target: &'a Mutex<HashMap<u64, V>>,
    buffer: Vec<(u64, V)>,
}

const BUFFER_SIZE: usize = 10_000;
const BUFFER_SIZE_MAX: usize = 100_000;

impl<'a, V> BufferedMapUpdater<'a, V> {
    pub fn new(target: &'a Mutex<HashMap<u64, V>>) -> BufferedMapUpdater<'a, V> {
        BufferedMapUpdater {
            target,
            buffer: Vec::new(),
        }
    }

    pub fn emplace(&mut self, key: u64, value: V) {
        self.buffer.push((key, value));
        if self.buffer.len() >= BUFFER_SIZE {
            self.flush(self.buffer.len() >= BUFFER_SIZE_MAX);
        }
    }

    fn flush(&mut self, force: bool) {
        let guard = if force {
            Some(self.target.lock().unwrap())
        } else {
            self.target.try_lock().ok()
        };
        let Some(mut map) = guard else {
            return;
        };
        for (key, value) in self.buffer.drain(..) {
            map.insert(key, value);
        }
    }
}

impl<V> Drop for BufferedMapUpdater<'_, V> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            self.flush(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_updater_flushes_on_drop() {
        let target = Mutex::new(HashMap::new());
        {
            let mut updater = BufferedMapUpdater::new(&target);
            updater.emplace(1, "a");
            updater.emplace(2, "b");
        }
        let map = target.lock().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1], "a");
    }
}
