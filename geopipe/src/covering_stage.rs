use crate::feature::{FeatureBuilder, FeatureTypes, Geometry};
use crate::regions::info_getter::{borders_path, Borders};
use crate::GeneratorError;
use geo::{Coord, LineString, MultiPolygon, Polygon};
use geopipe_core::cell::{
    cover_object, CellValuePair, CoveredGeometry, GEO_OBJECTS_DEPTH_LEVELS, REGIONS_DEPTH_LEVELS,
};
use geopipe_core::index::build_interval_index;
use geopipe_core::mercator;
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

/// Empty-area tolerance for keeping a partially covered cell, in leaf-area
/// units.
const CELL_PENALTY_AREA: u64 = 4;

fn to_grid_geometry(geometry: &Geometry, depth: usize) -> CoveredGeometry {
    let map = |p: Coord<f64>| mercator::to_cell_grid(p, depth);
    match geometry {
        Geometry::Point(p) => CoveredGeometry::Point(map(*p)),
        Geometry::Line(line) => {
            CoveredGeometry::Line(LineString(line.0.iter().map(|&p| map(p)).collect()))
        }
        Geometry::Area(area) => CoveredGeometry::Area(MultiPolygon::new(
            area.0
                .iter()
                .map(|polygon| {
                    Polygon::new(
                        LineString(polygon.exterior().0.iter().map(|&p| map(p)).collect()),
                        polygon
                            .interiors()
                            .iter()
                            .map(|ring| LineString(ring.0.iter().map(|&p| map(p)).collect()))
                            .collect(),
                    )
                })
                .collect(),
        )),
    }
}

/// Covers one feature and emits its (cell, id) pairs.
pub fn cover_feature(feature: &FeatureBuilder, depth: usize, out: &mut Vec<CellValuePair>) {
    let geometry = to_grid_geometry(&feature.geometry, depth);
    let id = feature.id.encoded();
    for cell in cover_object(&geometry, CELL_PENALTY_AREA, depth) {
        out.push(CellValuePair::new(cell.to_code(depth), id));
    }
}

fn build_index_file(
    mut pairs: Vec<CellValuePair>,
    depth: usize,
    out_path: &Path,
) -> Result<(), GeneratorError> {
    log::info!("sorting {} cell pairs", pairs.len());
    pairs.par_sort_unstable();

    let file = File::create(out_path).map_err(GeneratorError::io(out_path.display().to_string()))?;
    let mut writer = BufWriter::new(file);
    build_interval_index(&mut writer, &pairs, depth)?;
    log::info!("covering index written to {}", out_path.display());
    Ok(())
}

struct CoveringProcessor<F: Fn(&FeatureBuilder) -> bool + Send> {
    filter: F,
    depth: usize,
    pairs: Vec<CellValuePair>,
}

impl<F: Fn(&FeatureBuilder) -> bool + Send> crate::feature::feature_file::FeatureProcessor
    for CoveringProcessor<F>
{
    fn process(&mut self, feature: FeatureBuilder, _offset: u64) -> Result<(), GeneratorError> {
        if (self.filter)(&feature) {
            cover_feature(&feature, self.depth, &mut self.pairs);
        }
        Ok(())
    }
}

fn cover_features_file<F>(
    features: &Path,
    depth: usize,
    threads_count: usize,
    filter: F,
) -> Result<Vec<CellValuePair>, GeneratorError>
where
    F: Fn(&FeatureBuilder) -> bool + Send + Sync,
{
    log::info!("geometry cover features from {}", features.display());
    let processors = crate::feature::for_each_feature_parallel(threads_count, features, || {
        CoveringProcessor {
            filter: &filter,
            depth,
            pairs: Vec::new(),
        }
    })?;

    // Per-thread local covers concatenate; the index builder sorts.
    let pairs = processors
        .into_iter()
        .flat_map(|processor| processor.pairs)
        .collect_vec();
    log::info!("finished covering {}", features.display());
    Ok(pairs)
}

/// Builds the regions covering index and its `.borders` companion.
pub fn generate_regions_index(
    out_index: &Path,
    regions_features: &Path,
    threads_count: usize,
) -> Result<(), GeneratorError> {
    let pairs = cover_features_file(
        regions_features,
        REGIONS_DEPTH_LEVELS,
        threads_count,
        |fb: &FeatureBuilder| fb.geometry.is_area(),
    )?;
    build_index_file(pairs, REGIONS_DEPTH_LEVELS, out_index)?;

    let mut borders = Borders::default();
    crate::feature::for_each_feature(regions_features, |fb, _| {
        if let Geometry::Area(area) = &fb.geometry {
            borders.insert(fb.id.encoded(), area.clone());
        }
        Ok(())
    })?;
    borders.save(&borders_path(out_index))?;
    log::info!("saved {} region borders", borders.len());
    Ok(())
}

/// Builds the geo-objects covering index over buildings, addressed points,
/// opted-in POIs and, optionally, aggregated street geometries.
pub fn generate_geo_objects_index(
    out_index: &Path,
    geo_objects_features: &Path,
    streets_features: Option<&Path>,
    nodes_list: Option<&Path>,
    threads_count: usize,
) -> Result<(), GeneratorError> {
    let node_ids = match nodes_list {
        Some(path) => parse_node_ids(path)?,
        None => HashSet::new(),
    };

    let mut pairs = cover_features_file(
        geo_objects_features,
        GEO_OBJECTS_DEPTH_LEVELS,
        threads_count,
        |fb: &FeatureBuilder| {
            if is_building(fb) || has_house(fb) {
                return true;
            }
            is_poi(fb) && node_ids.contains(&fb.id.encoded())
        },
    )?;

    if let Some(streets) = streets_features {
        pairs.extend(cover_features_file(
            streets,
            GEO_OBJECTS_DEPTH_LEVELS,
            threads_count,
            is_street_feature,
        )?);
    }

    build_index_file(pairs, GEO_OBJECTS_DEPTH_LEVELS, out_index)
}

pub fn is_building(fb: &FeatureBuilder) -> bool {
    fb.types.has(FeatureTypes::BUILDING)
}

pub fn has_house(fb: &FeatureBuilder) -> bool {
    fb.house_number.as_deref().is_some_and(|h| !h.is_empty())
}

pub fn is_poi(fb: &FeatureBuilder) -> bool {
    fb.types.has(FeatureTypes::POI)
}

pub fn is_street_feature(fb: &FeatureBuilder) -> bool {
    if fb.name().is_none() {
        return false;
    }
    (fb.types.has(FeatureTypes::HIGHWAY) && (fb.geometry.is_line() || fb.geometry.is_area()))
        || fb.types.has(FeatureTypes::SQUARE)
}

/// Reads a list of encoded object ids, one decimal id per line.
pub fn parse_node_ids(path: &Path) -> Result<HashSet<u64>, GeneratorError> {
    let file = File::open(path).map_err(GeneratorError::io(path.display().to_string()))?;
    let mut ids = HashSet::new();
    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(GeneratorError::io(path.display().to_string()))?;
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        let id = token.parse().map_err(|e| {
            GeneratorError::Configuration(format!(
                "bad node id at {}:{}: {e}",
                path.display(),
                line_number + 1
            ))
        })?;
        ids.insert(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeaturesCollector, GeoObjectId, GeoObjectKind};
    use geopipe_core::index::IntervalIndex;
    use geopipe_core::kv::serialize_id;

    fn street_way(serial: u64, name: &str, points: &[(f64, f64)]) -> FeatureBuilder {
        let line = LineString(
            points
                .iter()
                .map(|&(lat, lon)| mercator::from_lat_lon(lat, lon))
                .collect(),
        );
        let mut fb = FeatureBuilder::new(
            GeoObjectId::new(GeoObjectKind::OsmWay, serial),
            Geometry::Line(line),
        );
        fb.types.insert(FeatureTypes::HIGHWAY);
        fb.names.set("default", name);
        fb
    }

    fn query_point(index: &IntervalIndex<memmap2::Mmap>, lat: f64, lon: f64) -> Vec<u64> {
        crate::regions::info_getter::search_at_point(
            index,
            mercator::from_lat_lon(lat, lon),
            GEO_OBJECTS_DEPTH_LEVELS,
        )
    }

    #[test]
    fn streets_index_returns_ways_at_their_points() {
        let dir = tempfile::tempdir().unwrap();
        let features = dir.path().join("streets.tmp");
        let index_path = dir.path().join("streets.idx");

        // Two Arbat ways meeting at (2.001, 1.002), plus an unrelated one.
        let mut collector = FeaturesCollector::create(&features).unwrap();
        collector
            .collect(&street_way(1, "Arbat Street", &[(2.001, 1.001), (2.001, 1.002)]))
            .unwrap();
        collector
            .collect(&street_way(2, "New Arbat Street", &[(2.002, 1.001), (2.001, 1.002)]))
            .unwrap();
        collector.finish().unwrap();

        let empty = dir.path().join("geo_objects.tmp");
        FeaturesCollector::create(&empty).unwrap().finish().unwrap();

        generate_geo_objects_index(&index_path, &empty, Some(&features), None, 2).unwrap();

        let index = IntervalIndex::open(&index_path).unwrap();

        let junction = query_point(&index, 2.001, 1.002);
        assert_eq!(
            junction,
            vec![
                GeoObjectId::new(GeoObjectKind::OsmWay, 1).encoded(),
                GeoObjectId::new(GeoObjectKind::OsmWay, 2).encoded(),
            ],
            "junction must return both ways"
        );

        let arbat_start = query_point(&index, 2.001, 1.001);
        assert_eq!(
            arbat_start,
            vec![GeoObjectId::new(GeoObjectKind::OsmWay, 1).encoded()],
            "start of the first way must return only it"
        );
    }

    #[test]
    fn node_id_list_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poi_ids");
        let id = GeoObjectId::new(GeoObjectKind::OsmNode, 42).encoded();
        std::fs::write(&path, format!("{id}\n")).unwrap();
        let ids = parse_node_ids(&path).unwrap();
        assert!(ids.contains(&id));
        let _ = serialize_id(id);
    }
}
