use super::maintainer::{BufferedMapUpdater, GeoObjectData, GeoObjectMaintainer};
use crate::config::GenerateInfo;
use crate::covering_stage::{self, has_house, is_building, is_poi};
use crate::feature::{FeatureBuilder, Geometry, NameTable};
use crate::regions::RegionInfoGetter;
use crate::GeneratorError;
use geo::{Coord, MultiPolygon};
use geopipe_core::coding::FilesMerger;
use geopipe_core::index::IntervalIndex;
use geopipe_core::kv::{serialize_id, KeyValueConcurrentWriter};
use geopipe_core::mercator;
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Ids of address points matched to a null building and back: a building
/// keeps a single representative address point.
#[derive(Default)]
pub struct NullBuildingsInfo {
    pub address_points_to_buildings: HashMap<u64, u64>,
    pub buildings_to_address_points: HashMap<u64, u64>,
}

/// The geo-objects stage: write addressed buildings/houses to the KV,
/// clothe address points in null-building geometry, then let POIs inherit
/// the nearest address.
pub fn generate_geo_objects(
    regions_index: &Path,
    regions_kv: &Path,
    geo_objects_features: &Path,
    ids_without_addresses: &Path,
    geo_objects_kv: &Path,
    threads_count: usize,
) -> Result<(), GeneratorError> {
    log::info!("start generating geo objects");
    let region_info = RegionInfoGetter::open(regions_index, regions_kv)?;
    log::info!(
        "size of regions key-value storage: {}",
        region_info.storage().size()
    );

    // The index is the peak memory consumer; build it before enrichment
    // allocates its hash tables.
    let index = make_temp_geo_objects_index(geo_objects_features, threads_count)?;
    let mut maintainer = GeoObjectMaintainer::new(index);
    log::info!("geo objects index was built");

    let geo_data = add_buildings_and_houses(
        geo_objects_features,
        geo_objects_kv,
        &region_info,
        threads_count,
    )?;
    log::info!("added {} geo objects with addresses", geo_data.len());
    maintainer.set_geo_data(geo_data);

    let buildings_info =
        enrich_points_with_outer_building_geometry(&maintainer, geo_objects_features, threads_count)?;

    add_pois_enriched_with_house_addresses(
        &maintainer,
        &region_info,
        &buildings_info,
        geo_objects_features,
        geo_objects_kv,
        ids_without_addresses,
        threads_count,
    )?;

    log::info!(
        "geo objects key-value storage saved to {}",
        geo_objects_kv.display()
    );
    Ok(())
}

/// Covering index over every candidate geo object, built into a temp file.
fn make_temp_geo_objects_index(
    geo_objects_features: &Path,
    threads_count: usize,
) -> Result<IntervalIndex<memmap2::Mmap>, GeneratorError> {
    let index_path = GenerateInfo::tmp_path_for_file();
    covering_stage::generate_geo_objects_index(
        &index_path,
        geo_objects_features,
        None,
        None,
        threads_count,
    )?;
    let index = IntervalIndex::open(&index_path)?;
    let _ = std::fs::remove_file(&index_path);
    Ok(index)
}

/// Pass 1: every building or addressed object gets its region address in
/// the KV and an entry in the geo-data cache.
fn add_buildings_and_houses(
    geo_objects_features: &Path,
    geo_objects_kv: &Path,
    region_info: &RegionInfoGetter,
    threads_count: usize,
) -> Result<HashMap<u64, GeoObjectData>, GeneratorError> {
    let geo_data = Mutex::new(HashMap::new());

    crate::feature::for_each_feature_parallel(threads_count, geo_objects_features, || {
        let mut kv_writer = KeyValueConcurrentWriter::open(geo_objects_kv)
            .expect("geo objects kv must be writable");
        let mut cache = BufferedMapUpdater::new(&geo_data);
        move |fb: FeatureBuilder, _offset: u64| {
            if !is_building(&fb) && !has_house(&fb) {
                return Ok(());
            }
            let Some((region_id, region_value)) = region_info.find_deepest(fb.key_point()) else {
                return Ok(());
            };

            let street = fb.street.clone().unwrap_or_default();
            let house = fb.house_number.clone().unwrap_or_default();
            let value = make_geo_object_value(
                &region_value,
                region_id,
                &street,
                &house,
                &fb.names,
                fb.key_point(),
            );
            kv_writer.write(fb.id.encoded(), &value)?;
            cache.emplace(
                fb.id.encoded(),
                GeoObjectData {
                    street,
                    house,
                    region_id,
                },
            );
            Ok(())
        }
    })?;

    Ok(geo_data.into_inner().unwrap())
}

/// Pass 2 (null buildings): address points borrow the polygon of the
/// building they sit in; the addressless building is dropped afterwards.
fn enrich_points_with_outer_building_geometry(
    maintainer: &GeoObjectMaintainer,
    geo_objects_features: &Path,
    threads_count: usize,
) -> Result<NullBuildingsInfo, GeneratorError> {
    // Match address points to the null building at their location.
    let points_to_buildings = Mutex::new(HashMap::new());
    let buildings_to_points = Mutex::new(HashMap::new());

    crate::feature::for_each_feature_parallel(threads_count, geo_objects_features, || {
        let mut points_updater = BufferedMapUpdater::new(&points_to_buildings);
        let mut buildings_updater = BufferedMapUpdater::new(&buildings_to_points);
        move |fb: FeatureBuilder, _offset: u64| {
            if !has_house(&fb) || !fb.geometry.is_point() {
                return Ok(());
            }
            let building_id = maintainer.search_id_of_first_matched_object(fb.key_point(), |id| {
                maintainer
                    .get_geo_data(id)
                    .is_some_and(|data| data.house.is_empty())
            });
            let Some(building_id) = building_id else {
                return Ok(());
            };
            points_updater.emplace(fb.id.encoded(), building_id);
            buildings_updater.emplace(building_id, fb.id.encoded());
            Ok(())
        }
    })?;

    let info = NullBuildingsInfo {
        address_points_to_buildings: points_to_buildings.into_inner().unwrap(),
        buildings_to_address_points: buildings_to_points.into_inner().unwrap(),
    };
    log::info!(
        "found {} address points with outer building geometry",
        info.address_points_to_buildings.len()
    );
    log::info!(
        "found {} helpful addressless buildings",
        info.buildings_to_address_points.len()
    );

    // Cache the matched buildings' geometries.
    let geometries: Mutex<HashMap<u64, MultiPolygon<f64>>> = Mutex::new(HashMap::new());
    crate::feature::for_each_feature_parallel(threads_count, geo_objects_features, || {
        let mut updater = BufferedMapUpdater::new(&geometries);
        let info = &info;
        move |fb: FeatureBuilder, _offset: u64| {
            let Geometry::Area(area) = &fb.geometry else {
                return Ok(());
            };
            if info
                .buildings_to_address_points
                .contains_key(&fb.id.encoded())
            {
                updater.emplace(fb.id.encoded(), area.clone());
            }
            Ok(())
        }
    })?;
    let geometries = geometries.into_inner().unwrap();
    log::info!("cached {} building geometries", geometries.len());

    // Rewrite the feature file: points grow polygons, donors disappear.
    let repacked = GenerateInfo::tmp_path_for_file();
    let mut merger = FilesMerger::new(&repacked);
    let enriched = AtomicUsize::new(0);

    let processors =
        crate::feature::for_each_feature_parallel(threads_count, geo_objects_features, || {
            let part = GenerateInfo::tmp_path_for_file();
            let collector = crate::feature::FeaturesCollector::create(&part)
                .expect("temp feature file must be writable");
            GeometryTransfer {
                info: &info,
                geometries: &geometries,
                collector: Some(collector),
                enriched: &enriched,
            }
        })?;
    for processor in processors {
        merger.defer_merge_and_delete(processor.into_path()?);
    }
    merger.merge()?;
    std::fs::rename(&repacked, geo_objects_features)
        .map_err(GeneratorError::io(geo_objects_features.display().to_string()))?;

    log::info!(
        "{} address points were enriched with outer building geometry",
        enriched.load(Ordering::Relaxed)
    );
    Ok(info)
}

struct GeometryTransfer<'a> {
    info: &'a NullBuildingsInfo,
    geometries: &'a HashMap<u64, MultiPolygon<f64>>,
    collector: Option<crate::feature::FeaturesCollector>,
    enriched: &'a AtomicUsize,
}

impl GeometryTransfer<'_> {
    fn into_path(mut self) -> Result<std::path::PathBuf, GeneratorError> {
        let collector = self.collector.take().unwrap();
        let path = collector.path().to_owned();
        collector.finish()?;
        Ok(path)
    }
}

impl crate::feature::feature_file::FeatureProcessor for GeometryTransfer<'_> {
    fn process(&mut self, mut fb: FeatureBuilder, _offset: u64) -> Result<(), GeneratorError> {
        let id = fb.id.encoded();

        if let Some(building_id) = self.info.address_points_to_buildings.get(&id) {
            match self.geometries.get(building_id) {
                Some(geometry) => {
                    fb.geometry = Geometry::Area(geometry.clone());
                    self.enriched.fetch_add(1, Ordering::Relaxed);
                }
                None => log::info!("{building_id:X} is a null building with strange geometry"),
            }
        }

        // The donor building's own record is dropped.
        if self.info.buildings_to_address_points.contains_key(&id) {
            return Ok(());
        }

        self.collector.as_mut().unwrap().collect(&fb)
    }
}

/// Pass 3: POIs inherit the address of the addressed object at their point,
/// falling back to a null building's representative address point.
fn add_pois_enriched_with_house_addresses(
    maintainer: &GeoObjectMaintainer,
    region_info: &RegionInfoGetter,
    buildings_info: &NullBuildingsInfo,
    geo_objects_features: &Path,
    geo_objects_kv: &Path,
    ids_without_addresses: &Path,
    threads_count: usize,
) -> Result<(), GeneratorError> {
    let mut poi_ids_merger = FilesMerger::new(ids_without_addresses);
    let enriched = AtomicUsize::new(0);

    let find_house_data = |point: Coord<f64>| -> Option<GeoObjectData> {
        let direct = maintainer.search_id_of_first_matched_object(point, |id| {
            maintainer
                .get_geo_data(id)
                .is_some_and(|data| !data.house.is_empty())
        });
        if let Some(id) = direct {
            return maintainer.get_geo_data(id).cloned();
        }
        for id in maintainer.search_ids_at_point(point) {
            if let Some(address_point) = buildings_info.buildings_to_address_points.get(&id) {
                return maintainer.get_geo_data(*address_point).cloned();
            }
        }
        None
    };

    let processors =
        crate::feature::for_each_feature_parallel(threads_count, geo_objects_features, || {
            let find_house_data = &find_house_data;
            let enriched = &enriched;
            let mut kv_writer = KeyValueConcurrentWriter::open(geo_objects_kv)
                .expect("geo objects kv must be writable");
            let poi_ids_path = GenerateInfo::tmp_path_for_file();
            let mut poi_ids = BufWriter::new(
                File::create(&poi_ids_path).expect("temp poi id file must be writable"),
            );
            let path_for_result = poi_ids_path.clone();
            let processor = move |fb: FeatureBuilder, _offset: u64| -> Result<(), GeneratorError> {
                if !is_poi(&fb) || is_building(&fb) || has_house(&fb) {
                    return Ok(());
                }
                let Some(house) = find_house_data(fb.key_point()) else {
                    return Ok(());
                };
                let Some(region_value) = region_info.storage().find(house.region_id) else {
                    return Ok(());
                };

                let value = make_geo_object_value(
                    &region_value,
                    house.region_id,
                    &house.street,
                    &house.house,
                    &fb.names,
                    fb.key_point(),
                );
                kv_writer.write(fb.id.encoded(), &value)?;
                writeln!(poi_ids, "{}", fb.id.encoded())
                    .map_err(GeneratorError::io("poi id list"))?;
                enriched.fetch_add(1, Ordering::Relaxed);
                Ok(())
            };
            PoiProcessor {
                processor,
                path: path_for_result,
            }
        })?;

    for processor in processors {
        poi_ids_merger.defer_merge_and_delete(processor.path);
    }
    poi_ids_merger.merge()?;

    log::info!(
        "added {} POIs enriched with address",
        enriched.load(Ordering::Relaxed)
    );
    Ok(())
}

struct PoiProcessor<F> {
    processor: F,
    path: std::path::PathBuf,
}

impl<F> crate::feature::feature_file::FeatureProcessor for PoiProcessor<F>
where
    F: FnMut(FeatureBuilder, u64) -> Result<(), GeneratorError> + Send,
{
    fn process(&mut self, feature: FeatureBuilder, offset: u64) -> Result<(), GeneratorError> {
        (self.processor)(feature, offset)
    }
}

/// A geo-object KV value: the region's locales with the object's own name,
/// street and building number folded into each locale block.
fn make_geo_object_value(
    region_value: &serde_json::Value,
    region_id: u64,
    street: &str,
    house: &str,
    names: &NameTable,
    point: Coord<f64>,
) -> serde_json::Value {
    let mut locales = region_value["properties"]["locales"].clone();
    if locales.is_null() {
        locales = json!({ "default": { "address": {} } });
    }
    let default_name = names.default_name().unwrap_or_default();
    if let Some(map) = locales.as_object_mut() {
        for (locale, entry) in map.iter_mut() {
            if !street.is_empty() {
                entry["address"]["street"] = json!(street);
            }
            if !house.is_empty() {
                entry["address"]["building"] = json!(house);
            }
            let name = names.get(locale).unwrap_or(default_name);
            if !name.is_empty() {
                entry["name"] = json!(name);
            }
        }
    }

    let (lat, lon) = mercator::to_lat_lon(point);
    json!({
        "type": "Feature",
        "geometry": { "type": "Point", "coordinates": [lon, lat] },
        "properties": {
            "kind": "building",
            "dref": serialize_id(region_id),
            "locales": locales,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_object_value_folds_address_into_locales() {
        let region = json!({
            "properties": {
                "locales": {
                    "default": {
                        "name": "Some Locality",
                        "address": { "locality": "Some Locality" }
                    }
                }
            }
        });
        let names = NameTable::with_default("Кофейня");
        let value = make_geo_object_value(
            &region,
            0xAB,
            "Good",
            "5",
            &names,
            Coord { x: 37.6, y: 55.7 },
        );

        assert_eq!(value["properties"]["kind"], "building");
        let default = &value["properties"]["locales"]["default"];
        assert_eq!(default["address"]["street"], "Good");
        assert_eq!(default["address"]["building"], "5");
        assert_eq!(default["address"]["locality"], "Some Locality");
        assert_eq!(default["name"], "Кофейня");
    }
}
