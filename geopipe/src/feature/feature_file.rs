use super::feature_builder::FeatureBuilder;
use crate::GeneratorError;
use geopipe_core::coding::{read_varuint, write_varuint};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Append-side of a classified `.tmp` feature file: varint-framed
/// `FeatureBuilder` records, read back in file-offset order.
pub struct FeaturesCollector {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FeaturesCollector {
    pub fn create(path: &Path) -> Result<FeaturesCollector, GeneratorError> {
        let file = File::create(path).map_err(GeneratorError::io(path.display().to_string()))?;
        Ok(FeaturesCollector {
            path: path.to_owned(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collect(&mut self, feature: &FeatureBuilder) -> Result<(), GeneratorError> {
        let mut payload = Vec::new();
        feature.write_to(&mut payload)?;
        let mut header = Vec::with_capacity(10);
        write_varuint(&mut header, payload.len() as u64)?;
        self.writer
            .write_all(&header)
            .and_then(|()| self.writer.write_all(&payload))
            .map_err(GeneratorError::io(self.path.display().to_string()))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), GeneratorError> {
        self.writer
            .flush()
            .map_err(GeneratorError::io(self.path.display().to_string()))
    }
}

fn load_records(path: &Path) -> Result<(Vec<u8>, Vec<(u64, usize, usize)>), GeneratorError> {
    let mut file = File::open(path).map_err(GeneratorError::io(path.display().to_string()))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(GeneratorError::io(path.display().to_string()))?;

    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let offset = pos as u64;
        let mut cursor = &data[pos..];
        let before = cursor.len();
        let len = read_varuint(&mut cursor)? as usize;
        let header = before - cursor.len();
        let start = pos + header;
        records.push((offset, start, start + len));
        pos = start + len;
    }
    Ok((data, records))
}

/// Visits every feature of a `.tmp` file in file-offset order.
pub fn for_each_feature<F>(path: &Path, mut f: F) -> Result<(), GeneratorError>
where
    F: FnMut(FeatureBuilder, u64) -> Result<(), GeneratorError>,
{
    let (data, records) = load_records(path)?;
    for (offset, start, end) in records {
        let feature = FeatureBuilder::read_from(&mut &data[start..end])?;
        f(feature, offset)?;
    }
    Ok(())
}

/// Parallel feature scan: the record table is split across the rayon pool
/// and each worker gets its own processor from `make_processor`. Record
/// order across workers is not guaranteed and not required.
pub fn for_each_feature_parallel<P, M>(
    threads_count: usize,
    path: &Path,
    make_processor: M,
) -> Result<Vec<P>, GeneratorError>
where
    P: Send,
    M: Fn() -> P + Sync,
    P: FeatureProcessor,
{
    let (data, records) = load_records(path)?;
    let chunk_size = records.len().div_ceil(threads_count.max(1)).max(1);

    let processors: Result<Vec<P>, GeneratorError> = records
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut processor = make_processor();
            for &(offset, start, end) in chunk {
                let feature = FeatureBuilder::read_from(&mut &data[start..end])?;
                processor.process(feature, offset)?;
            }
            Ok(processor)
        })
        .collect();
    processors
}

/// One worker's slice of a parallel feature scan.
pub trait FeatureProcessor: Send {
    fn process(&mut self, feature: FeatureBuilder, offset: u64) -> Result<(), GeneratorError>;
}

impl<F> FeatureProcessor for F
where
    F: FnMut(FeatureBuilder, u64) -> Result<(), GeneratorError> + Send,
{
    fn process(&mut self, feature: FeatureBuilder, offset: u64) -> Result<(), GeneratorError> {
        self(feature, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{GeoObjectId, GeoObjectKind, Geometry};
    use geo::Coord;

    fn point_feature(serial: u64) -> FeatureBuilder {
        let mut fb = FeatureBuilder::new(
            GeoObjectId::new(GeoObjectKind::OsmNode, serial),
            Geometry::Point(Coord {
                x: serial as f64,
                y: 0.5,
            }),
        );
        fb.names.set("default", format!("feature {serial}"));
        fb
    }

    #[test]
    fn sequential_scan_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.tmp");
        let mut collector = FeaturesCollector::create(&path).unwrap();
        for serial in 0..10 {
            collector.collect(&point_feature(serial)).unwrap();
        }
        collector.finish().unwrap();

        let mut serials = Vec::new();
        let mut last_offset = None;
        for_each_feature(&path, |fb, offset| {
            serials.push(fb.id.serial());
            assert!(last_offset < Some(offset) || last_offset.is_none());
            last_offset = Some(offset);
            Ok(())
        })
        .unwrap();
        assert_eq!(serials, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_scan_visits_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.tmp");
        let mut collector = FeaturesCollector::create(&path).unwrap();
        for serial in 0..100 {
            collector.collect(&point_feature(serial)).unwrap();
        }
        collector.finish().unwrap();

        let processors =
            for_each_feature_parallel(4, &path, || CollectingProcessor { seen: Vec::new() })
                .unwrap();

        let mut all: Vec<u64> = processors.into_iter().flat_map(|p| p.seen).collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    struct CollectingProcessor {
        seen: Vec<u64>,
    }

    impl FeatureProcessor for CollectingProcessor {
        fn process(&mut self, feature: FeatureBuilder, _offset: u64) -> Result<(), GeneratorError> {
            self.seen.push(feature.id.serial());
            Ok(())
        }
    }
}
