pub mod builder;
pub mod regions_tracing;
pub mod street_geometry;

pub use builder::StreetsBuilder;

use crate::regions::RegionInfoGetter;
use crate::GeneratorError;
use std::path::Path;

/// The streets stage: assemble logical streets per region, bind address
/// points, regenerate the aggregated street features and save the KV.
pub fn generate_streets(
    regions_index: &Path,
    regions_kv: &Path,
    streets_features: &Path,
    geo_objects_features: &Path,
    streets_kv: &Path,
    threads_count: usize,
) -> Result<(), GeneratorError> {
    log::info!("start generating streets");

    let region_info = RegionInfoGetter::open(regions_index, regions_kv)?;
    log::info!(
        "size of regions key-value storage: {}",
        region_info.storage().size()
    );

    let builder = StreetsBuilder::new(&region_info, threads_count);

    builder.assemble_streets(streets_features)?;
    log::info!("streets were built");

    builder.assemble_bindings(geo_objects_features)?;
    log::info!("street bindings were built");

    builder.regenerate_aggregated_streets_features(streets_features)?;
    log::info!(
        "street features are aggregated into {}",
        streets_features.display()
    );

    builder.save_streets_kv(&region_info, streets_kv)?;
    log::info!("streets key-value storage saved to {}", streets_kv.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{
        FeatureBuilder, FeatureTypes, FeaturesCollector, GeoObjectId, GeoObjectKind, Geometry,
    };
    use geo::{LineString, MultiPolygon, Polygon};
    use geopipe_core::kv::serialize_id;
    use geopipe_core::mercator;
    use std::path::PathBuf;

    const REGION_SERIAL: u64 = 500;

    fn mercator_line(points: &[(f64, f64)]) -> LineString<f64> {
        LineString(
            points
                .iter()
                .map(|&(lat, lon)| mercator::from_lat_lon(lat, lon))
                .collect(),
        )
    }

    fn street_way(serial: u64, name: &str, points: &[(f64, f64)]) -> FeatureBuilder {
        let mut fb = FeatureBuilder::new(
            GeoObjectId::new(GeoObjectKind::OsmWay, serial),
            Geometry::Line(mercator_line(points)),
        );
        fb.types.insert(FeatureTypes::HIGHWAY);
        fb.names.set("default", name);
        fb
    }

    /// One locality polygon covering lat/lon [0.5, 3.5]², with its index,
    /// borders and KV record.
    fn make_region_artifacts(dir: &std::path::Path) -> (PathBuf, PathBuf) {
        let ring = mercator_line(&[(0.5, 0.5), (0.5, 3.5), (3.5, 3.5), (3.5, 0.5), (0.5, 0.5)]);
        let mut region = FeatureBuilder::new(
            GeoObjectId::new(GeoObjectKind::OsmRelation, REGION_SERIAL),
            Geometry::Area(MultiPolygon::new(vec![Polygon::new(ring, vec![])])),
        );
        region.types.insert(FeatureTypes::ADMIN_BOUNDARY);
        region.names.set("default", "Some Locality");

        let features = dir.join("regions.tmp");
        let mut collector = FeaturesCollector::create(&features).unwrap();
        collector.collect(&region).unwrap();
        collector.finish().unwrap();

        let index = dir.join("regions.idx");
        crate::covering_stage::generate_regions_index(&index, &features, 1).unwrap();

        let kv = dir.join("regions.jsonl");
        let region_id = serialize_id(region.id.encoded());
        std::fs::write(
            &kv,
            format!(
                "{region_id} {}\n",
                serde_json::json!({
                    "type": "Feature",
                    "properties": {
                        "kind": "city",
                        "rank": 4,
                        "locales": {
                            "default": {
                                "name": "Some Locality",
                                "address": { "locality": "Some Locality" }
                            }
                        }
                    }
                })
            ),
        )
        .unwrap();
        (index, kv)
    }

    fn write_street_features(path: &std::path::Path) {
        let mut collector = FeaturesCollector::create(path).unwrap();
        collector
            .collect(&street_way(1, "Arbat Street", &[(2.001, 1.001), (2.001, 1.002)]))
            .unwrap();
        collector
            .collect(&street_way(2, "Arbat Street", &[(2.002, 1.001), (2.001, 1.002)]))
            .unwrap();
        collector
            .collect(&street_way(3, "New Arbat Street", &[(2.1, 1.1), (2.1, 1.2)]))
            .unwrap();
        collector.finish().unwrap();
    }

    fn run_streets_stage(dir: &std::path::Path, tag: &str) -> (Vec<String>, usize) {
        let (index, kv) = make_region_artifacts(dir);
        let streets = dir.join(format!("streets-{tag}.tmp"));
        write_street_features(&streets);
        let empty_geo = dir.join(format!("geo-{tag}.tmp"));
        FeaturesCollector::create(&empty_geo).unwrap().finish().unwrap();

        let out_kv = dir.join(format!("streets-{tag}.jsonl"));
        generate_streets(&index, &kv, &streets, &empty_geo, &out_kv, 1).unwrap();

        let mut lines: Vec<String> = std::fs::read_to_string(&out_kv)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        lines.sort();

        let mut aggregated = 0usize;
        crate::feature::for_each_feature(&streets, |_fb, _| {
            aggregated += 1;
            Ok(())
        })
        .unwrap();
        (lines, aggregated)
    }

    #[test]
    fn aggregates_same_named_ways_into_one_street() {
        let dir = tempfile::tempdir().unwrap();
        let (lines, aggregated) = run_streets_stage(dir.path(), "a");

        // Two distinct street names produce exactly two KV entries.
        assert_eq!(lines.len(), 2);
        let names: Vec<String> = lines
            .iter()
            .map(|line| {
                let (_, json) = line.split_once(' ').unwrap();
                let value: serde_json::Value = serde_json::from_str(json).unwrap();
                assert_eq!(value["properties"]["kind"], "street");
                value["properties"]["locales"]["default"]["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert!(names.iter().any(|n| n == "Arbat Street"));
        assert!(names.iter().any(|n| n == "New Arbat Street"));

        // Aggregation rewrote the feature file: one pin per street plus the
        // three contributing line segments.
        assert_eq!(aggregated, 5);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let (first, _) = run_streets_stage(dir_a.path(), "x");
        let (second, _) = run_streets_stage(dir_b.path(), "x");
        assert_eq!(first, second);
    }
}
