use super::regions_tracing::trace_path_regions;
use super::street_geometry::{Pin, StreetGeometry};
use crate::config::GenerateInfo;
use crate::feature::{FeatureBuilder, FeatureTypes, GeoObjectId, GeoObjectKind, Geometry, NameTable};
use crate::regions::RegionInfoGetter;
use crate::GeneratorError;
use geo::Coord;
use geopipe_core::kv::{serialize_id, KeyValue};
use geopipe_geocoder::tokenize::normalize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A logical street inside one region: merged multilingual name plus all
/// contributed geometry.
#[derive(Default)]
struct Street {
    name: NameTable,
    geometry: StreetGeometry,
}

#[derive(Default)]
struct RegionsArena {
    regions: HashMap<u64, HashMap<String, Street>>,
}

impl RegionsArena {
    fn insert_street(&mut self, region_id: u64, key: String, names: &NameTable) -> &mut Street {
        let street = self
            .regions
            .entry(region_id)
            .or_default()
            .entry(key)
            .or_default();
        street.name.merge_missing_from(names);
        street
    }
}

#[derive(Default)]
struct FeaturesArena {
    feature_streets: HashMap<u64, (u64, String)>,
}

/// Aggregates same-named street fragments into per-region logical streets.
/// Storage is sharded over `threads²` region arenas and feature arenas so
/// any two threads rarely contend on the same mutex.
pub struct StreetsBuilder<'a> {
    regions_arenas: Vec<Mutex<RegionsArena>>,
    features_arenas: Vec<Mutex<FeaturesArena>>,
    region_info: &'a RegionInfoGetter,
    surrogate_counter: AtomicU64,
    threads_count: usize,
}

impl<'a> StreetsBuilder<'a> {
    pub fn new(region_info: &'a RegionInfoGetter, threads_count: usize) -> StreetsBuilder<'a> {
        let threads_count = threads_count.max(1);
        let arenas = threads_count * threads_count;
        StreetsBuilder {
            regions_arenas: (0..arenas).map(|_| Mutex::default()).collect(),
            features_arenas: (0..arenas).map(|_| Mutex::default()).collect(),
            region_info,
            surrogate_counter: AtomicU64::new(0),
            threads_count,
        }
    }

    pub fn assemble_streets(&self, streets_features: &Path) -> Result<(), GeneratorError> {
        crate::feature::for_each_feature_parallel(self.threads_count, streets_features, || {
            move |fb: FeatureBuilder, _offset: u64| {
                self.add_street(&fb);
                Ok(())
            }
        })?;
        Ok(())
    }

    pub fn assemble_bindings(&self, geo_objects_features: &Path) -> Result<(), GeneratorError> {
        crate::feature::for_each_feature_parallel(self.threads_count, geo_objects_features, || {
            move |fb: FeatureBuilder, _offset: u64| {
                if let Some(street_name) = fb.street.clone().filter(|s| !s.is_empty()) {
                    self.add_street_binding(street_name, &fb);
                }
                Ok(())
            }
        })?;
        Ok(())
    }

    fn add_street(&self, fb: &FeatureBuilder) {
        if !crate::covering_stage::is_street_feature(fb) {
            return;
        }
        match &fb.geometry {
            Geometry::Area(_) => self.add_street_area(fb),
            Geometry::Point(_) => self.add_street_point(fb),
            Geometry::Line(_) => self.add_street_highway(fb),
        }
    }

    fn add_street_highway(&self, fb: &FeatureBuilder) {
        let Geometry::Line(path) = &fb.geometry else {
            return;
        };
        let segments = trace_path_regions(path, |point| {
            self.find_street_region_owner(point, false)
        });
        let single_segment = segments.len() == 1;
        for segment in segments {
            let street_id = if single_segment {
                fb.id
            } else {
                self.next_surrogate_id()
            };
            let region_id = segment.region.0;
            self.with_street(region_id, fb, |street| {
                street.geometry.add_highway_line(street_id, segment.path);
            });
        }
    }

    fn add_street_area(&self, fb: &FeatureBuilder) {
        let Geometry::Area(area) = &fb.geometry else {
            return;
        };
        let Some(region) = self.find_street_region_owner(fb.key_point(), true) else {
            return;
        };
        self.with_street(region.0, fb, |street| {
            street.geometry.add_highway_area(fb.id, area.clone());
        });
    }

    fn add_street_point(&self, fb: &FeatureBuilder) {
        let point = fb.key_point();
        let Some(region) = self.find_street_region_owner(point, true) else {
            return;
        };
        self.with_street(region.0, fb, |street| {
            street.geometry.set_pin(Pin {
                position: point,
                id: fb.id,
            });
        });
    }

    fn add_street_binding(&self, street_name: String, fb: &FeatureBuilder) {
        let point = fb.key_point();
        let Some(region) = self.find_street_region_owner(point, false) else {
            return;
        };
        let surrogate = self.next_surrogate_id();
        let key = normalize(&street_name);
        if key.is_empty() {
            return;
        }
        let names = NameTable::with_default(street_name);
        let arena = &self.regions_arenas[arena_index(&region.0, self.regions_arenas.len())];
        let mut arena = arena.lock().unwrap();
        let street = arena.insert_street(region.0, key, &names);
        street.geometry.add_binding(surrogate, point);
    }

    /// Locks the owning region arena, upserts the street under the
    /// feature's normalized name and applies `update`; then records the
    /// feature → street link for the regeneration pass.
    fn with_street<F: FnOnce(&mut Street)>(&self, region_id: u64, fb: &FeatureBuilder, update: F) {
        let Some(name) = fb.name() else {
            return;
        };
        let key = normalize(name);
        if key.is_empty() {
            return;
        }

        {
            let arena = &self.regions_arenas[arena_index(&region_id, self.regions_arenas.len())];
            let mut arena = arena.lock().unwrap();
            let street = arena.insert_street(region_id, key.clone(), &fb.names);
            update(street);
        }

        let feature_id = fb.id.encoded();
        let arena = &self.features_arenas[arena_index(&feature_id, self.features_arenas.len())];
        let mut arena = arena.lock().unwrap();
        arena
            .feature_streets
            .entry(feature_id)
            .or_insert((region_id, key));
    }

    /// Streets belong to the deepest region that is not itself a suburb;
    /// areas and points additionally require a locality in the chain.
    fn find_street_region_owner(
        &self,
        point: Coord<f64>,
        need_locality: bool,
    ) -> Option<KeyValue> {
        self.region_info.find_deepest_matching(point, |(_, value)| {
            let address = &value["properties"]["locales"]["default"]["address"];
            if !address["suburb"].is_null() || !address["sublocality"].is_null() {
                return false;
            }
            if need_locality && address["locality"].is_null() {
                return false;
            }
            true
        })
    }

    fn next_surrogate_id(&self) -> GeoObjectId {
        let serial = self.surrogate_counter.fetch_add(1, Ordering::Relaxed);
        GeoObjectId::new(GeoObjectKind::Surrogate, serial)
    }

    /// Rewrites the streets feature file so each logical street appears at
    /// most once: a pin point, its aggregate areas and its line segments.
    pub fn regenerate_aggregated_streets_features(
        &self,
        streets_features: &Path,
    ) -> Result<(), GeneratorError> {
        let aggregated_path = GenerateInfo::tmp_path_for_file();
        let mut collector = crate::feature::FeaturesCollector::create(&aggregated_path)?;

        let mut processed: HashSet<(u64, String)> = HashSet::new();
        crate::feature::for_each_feature(streets_features, |fb, _offset| {
            let link = {
                let arena =
                    &self.features_arenas[arena_index(&fb.id.encoded(), self.features_arenas.len())];
                let arena = arena.lock().unwrap();
                arena.feature_streets.get(&fb.id.encoded()).cloned()
            };
            let Some(link) = link else {
                return Ok(());
            };
            if !processed.insert(link.clone()) {
                return Ok(());
            }

            let arena = &self.regions_arenas[arena_index(&link.0, self.regions_arenas.len())];
            let arena = arena.lock().unwrap();
            let Some(street) = arena.regions.get(&link.0).and_then(|r| r.get(&link.1)) else {
                return Ok(());
            };
            write_as_aggregated_street(&fb, street, &mut collector)
        })?;

        collector.finish()?;
        std::fs::rename(&aggregated_path, streets_features)
            .map_err(GeneratorError::io(streets_features.display().to_string()))
    }

    /// One KV line per logical street, addressed through its region's
    /// locales.
    pub fn save_streets_kv(
        &self,
        region_info: &RegionInfoGetter,
        streets_kv: &Path,
    ) -> Result<(), GeneratorError> {
        let file =
            File::create(streets_kv).map_err(GeneratorError::io(streets_kv.display().to_string()))?;
        let mut out = BufWriter::new(file);

        for arena in &self.regions_arenas {
            let arena = arena.lock().unwrap();
            for (&region_id, streets) in &arena.regions {
                let Some(region_value) = region_info.storage().find(region_id) else {
                    log::warn!("region {region_id:X} missing in kv storage, skipping its streets");
                    continue;
                };
                for street in streets.values() {
                    let line = make_street_kv_line(region_id, &region_value, street);
                    out.write_all(line.as_bytes())
                        .map_err(GeneratorError::io(streets_kv.display().to_string()))?;
                }
            }
        }
        out.flush()
            .map_err(GeneratorError::io(streets_kv.display().to_string()))
    }
}

fn arena_index<K: Hash>(key: &K, arenas: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % arenas as u64) as usize
}

fn write_as_aggregated_street(
    fb: &FeatureBuilder,
    street: &Street,
    collector: &mut crate::feature::FeaturesCollector,
) -> Result<(), GeneratorError> {
    let pin = street.geometry.get_or_choose_pin();

    let mut base = fb.clone();
    base.id = pin.id;
    base.names = street.name.clone();

    let mut pin_feature = base.clone();
    pin_feature.geometry = Geometry::Point(pin.position);
    collector.collect(&pin_feature)?;

    for (_, area) in street.geometry.areas() {
        let mut area_feature = base.clone();
        area_feature.types.insert(FeatureTypes::SQUARE);
        area_feature.geometry = Geometry::Area(area.clone());
        collector.collect(&area_feature)?;
    }

    for (_, line) in street.geometry.lines() {
        let mut line_feature = base.clone();
        line_feature.geometry = Geometry::Line(line.clone());
        collector.collect(&line_feature)?;
    }
    Ok(())
}

fn make_street_kv_line(
    region_id: u64,
    region_value: &serde_json::Value,
    street: &Street,
) -> String {
    let pin = street.geometry.get_or_choose_pin();
    let bbox = street.geometry.bbox();

    // The street inherits its region's locales, with the street name set as
    // both the object name and the street address field per locale.
    let mut locales = region_value["properties"]["locales"].clone();
    if locales.is_null() {
        locales = json!({});
    }
    let default_name = street.name.default_name().unwrap_or_default().to_string();
    if let Some(map) = locales.as_object_mut() {
        for (locale, entry) in map.iter_mut() {
            let name = street.name.get(locale).unwrap_or(&default_name);
            entry["name"] = json!(name);
            entry["address"]["street"] = json!(name);
        }
        // Street locales absent from the region still get a block.
        for (locale, name) in street.name.iter() {
            if !map.contains_key(locale) {
                map.insert(
                    locale.to_string(),
                    json!({ "name": name, "address": { "street": name } }),
                );
            }
        }
    }

    let (pin_lat, pin_lon) = geopipe_core::mercator::to_lat_lon(pin.position);
    let bbox_array = bbox.map(|b| {
        let (min_lat, min_lon) = geopipe_core::mercator::to_lat_lon(b.min());
        let (max_lat, max_lon) = geopipe_core::mercator::to_lat_lon(b.max());
        json!([min_lon, min_lat, max_lon, max_lat])
    });

    let value = json!({
        "properties": {
            "kind": "street",
            "dref": serialize_id(region_id),
            "locales": locales,
        },
        "bbox": bbox_array,
        "pin": [pin_lon, pin_lat],
    });

    format!("{} {}\n", serialize_id(pin.id.encoded()), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn street_kv_line_shape() {
        let region_value = json!({
            "properties": {
                "rank": 4,
                "locales": {
                    "default": {
                        "name": "Some Locality",
                        "address": { "locality": "Some Locality", "country": "X" }
                    }
                }
            }
        });

        let mut street = Street::default();
        street.name = NameTable::with_default("Arbat Street");
        street.geometry.add_highway_line(
            GeoObjectId::new(GeoObjectKind::OsmWay, 1),
            geo::LineString::from(vec![(1.0, 2.0), (1.5, 2.0)]),
        );

        let line = make_street_kv_line(0xC0FFEE, &region_value, &street);
        let (_, payload) = line.trim_end().split_once(' ').unwrap();
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();

        assert_eq!(value["properties"]["kind"], "street");
        assert_eq!(value["properties"]["dref"], serialize_id(0xC0FFEE));
        let default = &value["properties"]["locales"]["default"];
        assert_eq!(default["name"], "Arbat Street");
        assert_eq!(default["address"]["street"], "Arbat Street");
        assert_eq!(default["address"]["locality"], "Some Locality");
        assert!(value["pin"].is_array());
    }
}
