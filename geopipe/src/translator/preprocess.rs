use crate::config::GenerateInfo;
use crate::GeneratorError;
use geopipe_core::mercator;
use geopipe_osm::cache::{IntermediateDataWriter, IntermediateFiles};
use geopipe_osm::model::{EntityKind, OsmElement, RelationElement, RelationMember, WayElement};
use geopipe_osm::source::{o5m, OsmSource, OsmSourceType};
use kdam::{tqdm, BarExt};

const WRITE_BATCH: usize = 10_000;

/// First pass: streams the OSM source into the intermediate store. The o5m
/// path fans out over worker threads, each decoding the whole stream and
/// keeping its own chunk share; xml and pbf stream on one thread with the
/// store soaking up batched writes.
pub fn generate_intermediate_data(info: &GenerateInfo) -> Result<(), GeneratorError> {
    let files = IntermediateFiles::new(info.intermediate_dir());
    let writer = IntermediateDataWriter::create(&files, info.node_storage)?;

    log::info!("data source: {}", info.osm_file_name);
    let source = OsmSource::new(&info.osm_file_name, info.osm_file_type);

    match info.osm_file_type {
        OsmSourceType::O5m if info.threads_count > 1 => {
            let threads = info.threads_count;
            std::thread::scope(|scope| -> Result<(), GeneratorError> {
                let mut handles = Vec::new();
                for task_id in 0..threads {
                    let writer = &writer;
                    let path = source.path();
                    handles.push(scope.spawn(move || -> Result<(), GeneratorError> {
                        let mut batcher = ElementBatcher::new(writer);
                        o5m::for_each_chunked(path, threads, task_id, WRITE_BATCH, |element| {
                            batcher.push(element)
                        })?;
                        batcher.finish()
                    }));
                }
                for handle in handles {
                    handle.join().expect("o5m ingest worker panicked")?;
                }
                Ok(())
            })?;
        }
        _ => {
            let mut progress = tqdm!(desc = "elements", unit = " rows", unit_scale = true);
            let mut batcher = ElementBatcher::new(&writer);
            source.for_each(|element| {
                let _ = progress.update(1);
                batcher.push(element);
            })?;
            batcher.finish()?;
            eprintln!();
        }
    }

    writer.save_index()?;
    log::info!("added points count = {}", writer.processed_points());
    Ok(())
}

/// Groups one producer's elements into per-kind batches and hands them to
/// the store as bulk writes. Write failures on the point file are fatal and
/// surface on the next `push` or `finish`.
struct ElementBatcher<'a> {
    writer: &'a IntermediateDataWriter,
    nodes: Vec<(u64, f64, f64)>,
    ways: Vec<WayElement>,
    relations: Vec<(u64, RelationElement)>,
    deferred_error: Option<GeneratorError>,
}

impl<'a> ElementBatcher<'a> {
    fn new(writer: &'a IntermediateDataWriter) -> ElementBatcher<'a> {
        ElementBatcher {
            writer,
            nodes: Vec::with_capacity(WRITE_BATCH),
            ways: Vec::with_capacity(WRITE_BATCH),
            relations: Vec::with_capacity(WRITE_BATCH),
            deferred_error: None,
        }
    }

    fn push(&mut self, element: OsmElement) {
        if self.deferred_error.is_some() {
            return;
        }
        match element.kind {
            EntityKind::Node => {
                let position = mercator::from_lat_lon(element.lat, element.lon);
                self.nodes.push((element.id, position.y, position.x));
                if self.nodes.len() >= WRITE_BATCH {
                    let batch = std::mem::take(&mut self.nodes);
                    self.run(|w| w.add_nodes(&batch).map_err(Into::into));
                }
            }
            EntityKind::Way => {
                let mut way = WayElement::new(element.id);
                way.nodes = element.node_refs;
                if way.is_valid() {
                    self.ways.push(way);
                }
                if self.ways.len() >= WRITE_BATCH {
                    let batch = std::mem::take(&mut self.ways);
                    self.run(|w| w.add_ways(&batch).map_err(Into::into));
                }
            }
            EntityKind::Relation => {
                let mut relation = RelationElement::default();
                for member in element.members {
                    match member.kind {
                        EntityKind::Node => relation
                            .nodes
                            .push(RelationMember::new(member.reference, member.role)),
                        EntityKind::Way => relation
                            .ways
                            .push(RelationMember::new(member.reference, member.role)),
                        // Nested relations are ignored.
                        _ => {}
                    }
                }
                for (key, value) in element.tags {
                    relation.tags.insert(key, value);
                }
                if relation.is_valid() {
                    self.relations.push((element.id, relation));
                }
                if self.relations.len() >= WRITE_BATCH {
                    let batch = std::mem::take(&mut self.relations);
                    self.run(|w| w.add_relations(&batch).map_err(Into::into));
                }
            }
            EntityKind::Unknown => {}
        }
    }

    fn run<F: FnOnce(&IntermediateDataWriter) -> Result<(), GeneratorError>>(&mut self, f: F) {
        if let Err(e) = f(self.writer) {
            self.deferred_error = Some(e);
        }
    }

    fn finish(mut self) -> Result<(), GeneratorError> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        let nodes = std::mem::take(&mut self.nodes);
        if !nodes.is_empty() {
            self.writer.add_nodes(&nodes)?;
        }
        let ways = std::mem::take(&mut self.ways);
        if !ways.is_empty() {
            self.writer.add_ways(&ways)?;
        }
        let relations = std::mem::take(&mut self.relations);
        if !relations.is_empty() {
            self.writer.add_relations(&relations)?;
        }
        Ok(())
    }
}
