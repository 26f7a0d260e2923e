use super::classify;
use super::geometry_assembler::{self, AssemblyStats};
use crate::config::GenerateInfo;
use crate::feature::{
    FeatureBuilder, FeatureTypes, FeaturesCollector, GeoObjectId, GeoObjectKind, Geometry,
    NameTable,
};
use crate::GeneratorError;
use geo::Coord;
use geopipe_core::mercator;
use geopipe_osm::cache::{IntermediateDataReader, IntermediateFiles};
use geopipe_osm::model::{OsmElement, RelationElement};
use geopipe_osm::source::OsmSource;
use kdam::{tqdm, BarExt};

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureTargets {
    pub regions: bool,
    pub streets: bool,
    pub geo_objects: bool,
}

impl FeatureTargets {
    pub fn any(&self) -> bool {
        self.regions || self.streets || self.geo_objects
    }
}

/// Second pass: re-reads the element stream, resolves geometry through the
/// intermediate store and splits classified features into the regions,
/// streets and geo-objects `.tmp` files.
pub fn generate_features(info: &GenerateInfo, targets: FeatureTargets) -> Result<(), GeneratorError> {
    let files = IntermediateFiles::new(info.intermediate_dir());
    let cache = IntermediateDataReader::open(&files, info.node_storage)?;

    let mut processor = Processor::simple(&cache, info, targets)?;

    let source = OsmSource::new(&info.osm_file_name, info.osm_file_type);
    let mut progress = tqdm!(desc = "features", unit = " rows", unit_scale = true);
    source.for_each(|element| {
        let _ = progress.update(1);
        processor.emit(element);
    })?;
    eprintln!();

    processor.finish()
}

/// Translator output sink. Parallel translator runs merge their processors
/// pairwise; the only realized pair is Simple into Simple.
pub enum Processor<'a> {
    Simple(SimpleProcessor<'a>),
}

impl<'a> Processor<'a> {
    pub fn simple(
        cache: &'a IntermediateDataReader,
        info: &GenerateInfo,
        targets: FeatureTargets,
    ) -> Result<Processor<'a>, GeneratorError> {
        Ok(Processor::Simple(SimpleProcessor::create(cache, info, targets)?))
    }

    pub fn emit(&mut self, element: OsmElement) {
        match self {
            Processor::Simple(processor) => processor.emit(element),
        }
    }

    /// Folds `other`'s accumulated state into `self`. Simple→Simple is the
    /// only pair that exists; any future processor kind must define its own
    /// merge before it may participate.
    pub fn merge(&mut self, other: Processor<'a>) {
        match (self, other) {
            (Processor::Simple(target), Processor::Simple(source)) => target.absorb(source),
        }
    }

    pub fn finish(self) -> Result<(), GeneratorError> {
        match self {
            Processor::Simple(processor) => processor.finish(),
        }
    }
}

#[derive(Debug, Default)]
struct FeatureStats {
    regions: u64,
    place_points: u64,
    streets: u64,
    geo_objects: u64,
    invalid: u64,
}

pub struct SimpleProcessor<'a> {
    cache: &'a IntermediateDataReader,
    regions: Option<FeaturesCollector>,
    streets: Option<FeaturesCollector>,
    geo_objects: Option<FeaturesCollector>,
    stats: FeatureStats,
    assembly: AssemblyStats,
}

impl<'a> SimpleProcessor<'a> {
    fn create(
        cache: &'a IntermediateDataReader,
        info: &GenerateInfo,
        targets: FeatureTargets,
    ) -> Result<SimpleProcessor<'a>, GeneratorError> {
        std::fs::create_dir_all(info.intermediate_dir())
            .map_err(GeneratorError::io(info.intermediate_dir().display().to_string()))?;
        let open = |enabled: bool, bucket: &str| -> Result<Option<FeaturesCollector>, GeneratorError> {
            if !enabled {
                return Ok(None);
            }
            FeaturesCollector::create(&info.tmp_feature_file(bucket)).map(Some)
        };
        Ok(SimpleProcessor {
            cache,
            regions: open(targets.regions, "regions")?,
            streets: open(targets.streets, "streets")?,
            geo_objects: open(targets.geo_objects, "geo_objects")?,
            stats: FeatureStats::default(),
            assembly: AssemblyStats::default(),
        })
    }

    fn absorb(&mut self, other: SimpleProcessor<'a>) {
        self.stats.regions += other.stats.regions;
        self.stats.place_points += other.stats.place_points;
        self.stats.streets += other.stats.streets;
        self.stats.geo_objects += other.stats.geo_objects;
        self.stats.invalid += other.stats.invalid;
        self.assembly.missing_ways += other.assembly.missing_ways;
        self.assembly.missing_nodes += other.assembly.missing_nodes;
        self.assembly.broken_rings += other.assembly.broken_rings;
    }

    fn emit(&mut self, element: OsmElement) {
        if self.regions.is_some() {
            self.emit_region(&element);
        }
        if self.streets.is_some() {
            self.emit_street(&element);
        }
        if self.geo_objects.is_some() {
            self.emit_geo_object(&element);
        }
    }

    fn feature_id(element: &OsmElement) -> GeoObjectId {
        let kind = match element.kind {
            geopipe_osm::model::EntityKind::Node => GeoObjectKind::OsmNode,
            geopipe_osm::model::EntityKind::Way => GeoObjectKind::OsmWay,
            _ => GeoObjectKind::OsmRelation,
        };
        GeoObjectId::new(kind, element.id)
    }

    fn element_point(element: &OsmElement) -> Coord<f64> {
        mercator::from_lat_lon(element.lat, element.lon)
    }

    fn area_geometry(&mut self, element: &OsmElement) -> Option<Geometry> {
        if element.is_way() {
            return geometry_assembler::closed_way_area(self.cache, &element.node_refs, &mut self.assembly)
                .map(Geometry::Area);
        }
        if element.is_relation() {
            let relation = to_relation(element);
            return geometry_assembler::relation_multipolygon(self.cache, &relation, &mut self.assembly)
                .map(Geometry::Area);
        }
        None
    }

    fn emit_region(&mut self, element: &OsmElement) {
        if classify::is_place_point(element) {
            let mut fb = FeatureBuilder::new(
                Self::feature_id(element),
                Geometry::Point(Self::element_point(element)),
            );
            fb.types.insert(FeatureTypes::PLACE);
            fb.names = NameTable::from_tags(element.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            fb.region_info = classify::region_info(element);
            self.stats.place_points += 1;
            self.collect(Bucket::Regions, fb);
            return;
        }

        if !classify::is_region_candidate(element) {
            return;
        }
        let Some(geometry) = self.area_geometry(element) else {
            return;
        };
        let mut fb = FeatureBuilder::new(Self::feature_id(element), geometry);
        fb.types.insert(FeatureTypes::ADMIN_BOUNDARY);
        fb.names = NameTable::from_tags(element.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        fb.region_info = classify::region_info(element);
        self.stats.regions += 1;
        self.collect(Bucket::Regions, fb);
    }

    fn emit_street(&mut self, element: &OsmElement) {
        if !classify::is_street(element) {
            return;
        }

        let names =
            NameTable::from_tags(element.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let is_square = element.has_tag_value("place", "square");

        let geometries: Vec<Geometry> = if element.is_node() {
            vec![Geometry::Point(Self::element_point(element))]
        } else if element.is_way() {
            if is_square {
                self.area_geometry(element).into_iter().collect()
            } else {
                geometry_assembler::way_line(self.cache, &element.node_refs, &mut self.assembly)
                    .map(Geometry::Line)
                    .into_iter()
                    .collect()
            }
        } else {
            // A street relation contributes each member way separately.
            let relation = to_relation(element);
            let mut lines = Vec::new();
            for member in &relation.ways {
                if let Ok(Some(way)) = self.cache.way(member.reference) {
                    if let Some(line) =
                        geometry_assembler::way_line(self.cache, &way.nodes, &mut self.assembly)
                    {
                        lines.push(Geometry::Line(line));
                    }
                }
            }
            lines
        };

        for geometry in geometries {
            let mut fb = FeatureBuilder::new(Self::feature_id(element), geometry);
            fb.types.insert(if is_square {
                FeatureTypes::SQUARE
            } else {
                FeatureTypes::HIGHWAY
            });
            fb.names = names.clone();
            self.stats.streets += 1;
            self.collect(Bucket::Streets, fb);
        }
    }

    fn emit_geo_object(&mut self, element: &OsmElement) {
        let is_building = classify::is_building(element);
        let has_house = classify::has_house(element);
        let is_poi = classify::is_poi(element);
        if !is_building && !has_house && !is_poi {
            return;
        }

        let geometry = if element.is_node() {
            Some(Geometry::Point(Self::element_point(element)))
        } else {
            self.area_geometry(element).or_else(|| {
                if element.is_way() {
                    geometry_assembler::way_line(self.cache, &element.node_refs, &mut self.assembly)
                        .map(Geometry::Line)
                } else {
                    None
                }
            })
        };
        let Some(geometry) = geometry else {
            return;
        };

        let mut fb = FeatureBuilder::new(Self::feature_id(element), geometry);
        if is_building {
            fb.types.insert(FeatureTypes::BUILDING);
        }
        if is_poi {
            fb.types.insert(FeatureTypes::POI);
        }
        fb.names = NameTable::from_tags(element.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        fb.street = element.tag("addr:street").map(str::to_string);
        fb.house_number = element.tag("addr:housenumber").map(str::to_string);
        self.stats.geo_objects += 1;
        self.collect(Bucket::GeoObjects, fb);
    }

    fn collect(&mut self, bucket: Bucket, fb: FeatureBuilder) {
        if fb.validate().is_err() {
            self.stats.invalid += 1;
            return;
        }
        let collector = match bucket {
            Bucket::Regions => self.regions.as_mut(),
            Bucket::Streets => self.streets.as_mut(),
            Bucket::GeoObjects => self.geo_objects.as_mut(),
        };
        if let Some(collector) = collector {
            if let Err(e) = collector.collect(&fb) {
                log::error!("feature write failed: {e}");
            }
        }
    }

    fn finish(self) -> Result<(), GeneratorError> {
        log::info!(
            "features: {} regions, {} place points, {} streets, {} geo objects ({} invalid skipped)",
            self.stats.regions,
            self.stats.place_points,
            self.stats.streets,
            self.stats.geo_objects,
            self.stats.invalid,
        );
        if self.assembly.missing_ways + self.assembly.missing_nodes + self.assembly.broken_rings > 0
        {
            log::warn!(
                "geometry assembly skipped {} ways, {} nodes, {} rings",
                self.assembly.missing_ways,
                self.assembly.missing_nodes,
                self.assembly.broken_rings,
            );
        }
        for collector in [self.regions, self.streets, self.geo_objects].into_iter().flatten() {
            collector.finish()?;
        }
        Ok(())
    }
}

enum Bucket {
    Regions,
    Streets,
    GeoObjects,
}

fn to_relation(element: &OsmElement) -> RelationElement {
    let mut relation = RelationElement::default();
    for member in &element.members {
        match member.kind {
            geopipe_osm::model::EntityKind::Node => relation
                .nodes
                .push(geopipe_osm::model::RelationMember::new(
                    member.reference,
                    member.role.clone(),
                )),
            geopipe_osm::model::EntityKind::Way => relation
                .ways
                .push(geopipe_osm::model::RelationMember::new(
                    member.reference,
                    member.role.clone(),
                )),
            _ => {}
        }
    }
    for (key, value) in &element.tags {
        relation.tags.insert(key.clone(), value.clone());
    }
    relation
}
