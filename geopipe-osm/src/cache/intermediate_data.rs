use super::element_cache::{ElementCacheReader, ElementCacheWriter};
use super::index_file::{IndexFileReader, IndexFileWriter};
use super::point_storage::{
    create_point_storage_reader, create_point_storage_writer, NodeStorageType,
    PointStorageReader, PointStorageWriter,
};
use crate::model::{RelationElement, WayElement};
use crate::OsmError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Relations of any other type are dropped at ingress.
pub const RETAINED_RELATION_TYPES: [&str; 6] = [
    "multipolygon",
    "route",
    "boundary",
    "associatedStreet",
    "building",
    "restriction",
];

/// The five logical files of the intermediate store inside one directory.
pub struct IntermediateFiles {
    dir: PathBuf,
}

impl IntermediateFiles {
    pub fn new(dir: impl Into<PathBuf>) -> IntermediateFiles {
        IntermediateFiles { dir: dir.into() }
    }

    pub fn nodes(&self) -> PathBuf {
        self.dir.join("nodes.dat")
    }

    pub fn ways(&self) -> PathBuf {
        self.dir.join("ways.dat")
    }

    pub fn relations(&self) -> PathBuf {
        self.dir.join("relations.dat")
    }

    pub fn node_to_relations(&self) -> PathBuf {
        self.dir.join("nodes.id2rel")
    }

    pub fn way_to_relations(&self) -> PathBuf {
        self.dir.join("ways.id2rel")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Write side of the §C1 store. Accepts pre-grouped bulk writes from any
/// number of producer threads; each logical file serializes behind its own
/// mutex.
pub struct IntermediateDataWriter {
    nodes: Mutex<Box<dyn PointStorageWriter>>,
    ways: Mutex<ElementCacheWriter>,
    relations: Mutex<ElementCacheWriter>,
    node_to_relations: Mutex<IndexFileWriter>,
    way_to_relations: Mutex<IndexFileWriter>,
}

impl IntermediateDataWriter {
    pub fn create(
        files: &IntermediateFiles,
        storage: NodeStorageType,
    ) -> Result<IntermediateDataWriter, OsmError> {
        std::fs::create_dir_all(files.dir()).map_err(OsmError::io(files.dir().display().to_string()))?;
        Ok(IntermediateDataWriter {
            nodes: Mutex::new(create_point_storage_writer(storage, &files.nodes())?),
            ways: Mutex::new(ElementCacheWriter::create(&files.ways())?),
            relations: Mutex::new(ElementCacheWriter::create(&files.relations())?),
            node_to_relations: Mutex::new(IndexFileWriter::create(&files.node_to_relations())?),
            way_to_relations: Mutex::new(IndexFileWriter::create(&files.way_to_relations())?),
        })
    }

    pub fn add_nodes(&self, nodes: &[(u64, f64, f64)]) -> Result<(), OsmError> {
        self.nodes.lock().unwrap().add_points(nodes)
    }

    pub fn add_ways(&self, ways: &[WayElement]) -> Result<(), OsmError> {
        let mut cache = self.ways.lock().unwrap();
        let mut payload = Vec::new();
        for way in ways {
            payload.clear();
            way.write_to(&mut payload)?;
            cache.write(way.id, &payload)?;
        }
        Ok(())
    }

    pub fn add_relations(&self, relations: &[(u64, RelationElement)]) -> Result<(), OsmError> {
        let retained: Vec<&(u64, RelationElement)> = relations
            .iter()
            .filter(|(_, relation)| {
                relation
                    .relation_type()
                    .is_some_and(|t| RETAINED_RELATION_TYPES.contains(&t))
            })
            .collect();
        if retained.is_empty() {
            return Ok(());
        }

        {
            let mut cache = self.relations.lock().unwrap();
            let mut payload = Vec::new();
            for (id, relation) in &retained {
                payload.clear();
                relation.write_to(&mut payload)?;
                cache.write(*id, &payload)?;
            }
        }
        {
            let mut index = self.node_to_relations.lock().unwrap();
            for (id, relation) in &retained {
                for member in &relation.nodes {
                    index.add(member.reference, *id)?;
                }
            }
        }
        {
            let mut index = self.way_to_relations.lock().unwrap();
            for (id, relation) in &retained {
                for member in &relation.ways {
                    index.add(member.reference, *id)?;
                }
            }
        }
        Ok(())
    }

    pub fn processed_points(&self) -> u64 {
        self.nodes.lock().unwrap().processed_points()
    }

    pub fn save_index(&self) -> Result<(), OsmError> {
        self.nodes.lock().unwrap().finish()?;
        self.ways.lock().unwrap().save_offsets()?;
        self.relations.lock().unwrap().save_offsets()?;
        self.node_to_relations.lock().unwrap().write_all()?;
        self.way_to_relations.lock().unwrap().write_all()
    }
}

/// Read side of the §C1 store; shareable across worker threads.
pub struct IntermediateDataReader {
    nodes: Box<dyn PointStorageReader>,
    ways: ElementCacheReader,
    relations: ElementCacheReader,
    node_to_relations: IndexFileReader,
    way_to_relations: IndexFileReader,
}

impl IntermediateDataReader {
    pub fn open(
        files: &IntermediateFiles,
        storage: NodeStorageType,
    ) -> Result<IntermediateDataReader, OsmError> {
        Ok(IntermediateDataReader {
            nodes: create_point_storage_reader(storage, &files.nodes())?,
            ways: ElementCacheReader::open(&files.ways())?,
            relations: ElementCacheReader::open(&files.relations())?,
            node_to_relations: IndexFileReader::open(&files.node_to_relations())?,
            way_to_relations: IndexFileReader::open(&files.way_to_relations())?,
        })
    }

    /// Projected (y, x) of a node.
    pub fn node(&self, id: u64) -> Option<(f64, f64)> {
        self.nodes.get_point(id)
    }

    pub fn way(&self, id: u64) -> Result<Option<WayElement>, OsmError> {
        let Some(bytes) = self.ways.read(id)? else {
            return Ok(None);
        };
        let mut way = WayElement::new(id);
        way.read_from(&mut &bytes[..])?;
        Ok(Some(way))
    }

    pub fn relation(&self, id: u64) -> Result<Option<RelationElement>, OsmError> {
        let Some(bytes) = self.relations.read(id)? else {
            return Ok(None);
        };
        let mut relation = RelationElement::default();
        relation.read_from(&mut &bytes[..])?;
        Ok(Some(relation))
    }

    pub fn for_each_relation_by_way<F>(&self, way_id: u64, mut f: F) -> Result<(), OsmError>
    where
        F: FnMut(u64, &RelationElement),
    {
        let mut relation_ids = Vec::new();
        self.way_to_relations
            .for_each_value(way_id, |id| relation_ids.push(id));
        for id in relation_ids {
            if let Some(relation) = self.relation(id)? {
                f(id, &relation);
            }
        }
        Ok(())
    }

    pub fn for_each_relation_by_node<F>(&self, node_id: u64, mut f: F) -> Result<(), OsmError>
    where
        F: FnMut(u64, &RelationElement),
    {
        let mut relation_ids = Vec::new();
        self.node_to_relations
            .for_each_value(node_id, |id| relation_ids.push(id));
        for id in relation_ids {
            if let Some(relation) = self.relation(id)? {
                f(id, &relation);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationMember;

    fn make_store(dir: &Path) -> (IntermediateFiles, IntermediateDataWriter) {
        let files = IntermediateFiles::new(dir);
        let writer = IntermediateDataWriter::create(&files, NodeStorageType::Index).unwrap();
        (files, writer)
    }

    #[test]
    fn ways_and_relations_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (files, writer) = make_store(dir.path());

        writer
            .add_nodes(&[(1, 10.0, 20.0), (2, 10.1, 20.1), (3, 10.2, 20.2)])
            .unwrap();

        let mut way = WayElement::new(273163);
        way.nodes = vec![1, 2, 3];
        writer.add_ways(std::slice::from_ref(&way)).unwrap();

        let mut relation = RelationElement::default();
        relation.ways.push(RelationMember::new(273163, "outer"));
        relation.tags.insert("type".into(), "multipolygon".into());

        let mut dropped = RelationElement::default();
        dropped.ways.push(RelationMember::new(273163, "outer"));
        dropped.tags.insert("type".into(), "site".into());

        writer
            .add_relations(&[(273177, relation), (273178, dropped)])
            .unwrap();
        writer.save_index().unwrap();

        let reader = IntermediateDataReader::open(&files, NodeStorageType::Index).unwrap();
        assert_eq!(reader.way(273163).unwrap().unwrap().nodes, vec![1, 2, 3]);
        assert!(reader.node(2).is_some());

        let mut seen = Vec::new();
        reader
            .for_each_relation_by_way(273163, |id, relation| {
                seen.push((id, relation.relation_type().unwrap().to_string()));
            })
            .unwrap();
        // The "site" relation was filtered at write time.
        assert_eq!(seen, vec![(273177, "multipolygon".to_string())]);

        assert!(reader.relation(273178).unwrap().is_none());
    }

    #[test]
    fn concurrent_bulk_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (files, writer) = make_store(dir.path());

        std::thread::scope(|scope| {
            for t in 0u64..4 {
                let writer = &writer;
                scope.spawn(move || {
                    let nodes: Vec<(u64, f64, f64)> = (0..250)
                        .map(|i| (t * 1000 + i, i as f64 * 0.001, t as f64))
                        .collect();
                    writer.add_nodes(&nodes).unwrap();

                    let ways: Vec<WayElement> = (0..50)
                        .map(|i| {
                            let mut way = WayElement::new(t * 1000 + i);
                            way.nodes = vec![t, i, t + i];
                            way
                        })
                        .collect();
                    writer.add_ways(&ways).unwrap();
                });
            }
        });
        writer.save_index().unwrap();
        assert_eq!(writer.processed_points(), 1000);

        let reader = IntermediateDataReader::open(&files, NodeStorageType::Index).unwrap();
        for t in 0u64..4 {
            assert_eq!(reader.way(t * 1000 + 7).unwrap().unwrap().nodes, vec![t, 7, t + 7]);
        }
    }
}
