use crate::hierarchy::{Entry, Hierarchy, ParsingStats};
use crate::name_dictionary::{MultipleNames, NameDictionaryBuilder, UNSPECIFIED_POSITION};
use crate::types::TYPE_COUNT;
use crate::GeocoderError;
use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const VERSION_KEY: &str = "version";
/// Entry totals are logged once per this many lines.
const LOG_BATCH: usize = 100_000;

/// Streams a `.jsonl` / `.jsonl.gz` hierarchy into memory. Lines parse in
/// parallel chunks, each with a chunk-local name dictionary that is then
/// re-interned into the shared one.
pub struct HierarchyReader {
    lines: Vec<String>,
    data_version: String,
}

impl HierarchyReader {
    pub fn open(path: &Path, data_version_headline: bool) -> Result<HierarchyReader, GeocoderError> {
        let file =
            File::open(path).map_err(|e| GeocoderError::Open(path.display().to_string(), e))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::from_reader(BufReader::new(reader), data_version_headline)
    }

    pub fn from_reader<R: BufRead>(
        reader: R,
        data_version_headline: bool,
    ) -> Result<HierarchyReader, GeocoderError> {
        let mut lines: Vec<String> = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| GeocoderError::Load(format!("read failure: {e}")))?;
            lines.push(line);
        }

        let mut data_version = String::new();
        if data_version_headline {
            let headline = lines.first().ok_or(GeocoderError::NoVersion)?;
            let (key, version) = headline.split_once(' ').ok_or(GeocoderError::NoVersion)?;
            if key != VERSION_KEY {
                return Err(GeocoderError::NoVersion);
            }
            data_version = version.to_string();
            lines.remove(0);
        }

        Ok(HierarchyReader { lines, data_version })
    }

    /// Parses all lines on up to `readers_count` workers and assembles the
    /// hierarchy.
    pub fn read(self, readers_count: usize) -> Result<(Hierarchy, ParsingStats), GeocoderError> {
        log::info!("loading data version {}", self.data_version);
        log::info!("reading entries...");

        let readers_count = readers_count.max(1);
        let chunk_size = self.lines.len().div_ceil(readers_count).max(1);

        struct ChunkResult {
            entries: Vec<Entry>,
            dictionary: crate::name_dictionary::NameDictionary,
            stats: ParsingStats,
        }

        let chunks: Vec<ChunkResult> = self
            .lines
            .par_chunks(chunk_size)
            .map(|lines| {
                let mut builder = NameDictionaryBuilder::default();
                let mut stats = ParsingStats::default();
                let mut entries = Vec::with_capacity(lines.len());
                for line in lines {
                    if let Some(entry) = parse_line(line, &mut builder, &mut stats) {
                        entries.push(entry);
                    }
                }
                ChunkResult {
                    entries,
                    dictionary: builder.release(),
                    stats,
                }
            })
            .collect();

        let mut builder = NameDictionaryBuilder::default();
        let mut entries = Vec::new();
        let mut stats = ParsingStats::default();
        for chunk in chunks {
            for mut entry in chunk.entries {
                for i in 0..TYPE_COUNT {
                    let position = entry.normalized_address[i];
                    if position != UNSPECIFIED_POSITION {
                        let names: MultipleNames = chunk.dictionary.get(position).clone();
                        entry.normalized_address[i] = builder.add(names);
                    }
                }
                entries.push(entry);
                if entries.len() % LOG_BATCH == 0 {
                    log::info!("read {} entries", entries.len());
                }
            }
            stats.absorb(&chunk.stats);
        }

        log::info!("sorting entries...");
        entries.sort_by_key(|e| e.osm_id);
        check_duplicate_osm_ids(&entries, &mut stats);

        log::info!("finished reading and indexing the hierarchy");
        log::info!("entries loaded: {}", stats.num_loaded);
        log::info!("corrupted json lines: {}", stats.bad_jsons);
        log::info!("unreadable ids: {}", stats.bad_osm_ids);
        log::info!("duplicate ids: {}", stats.duplicate_osm_ids);
        log::info!("entries without address: {}", stats.empty_addresses);
        log::info!("entries without names: {}", stats.empty_names);
        log::info!("street entries without a locality: {}", stats.no_locality_streets);
        log::info!("building entries without a locality: {}", stats.no_locality_buildings);

        Ok((
            Hierarchy::new(entries, builder.release(), self.data_version),
            stats,
        ))
    }
}

fn parse_line(line: &str, builder: &mut NameDictionaryBuilder, stats: &mut ParsingStats) -> Option<Entry> {
    if line.is_empty() {
        return None;
    }
    let Some((key, json)) = line.split_once(' ') else {
        log::warn!("cannot read osm id, line: {line}");
        stats.bad_osm_ids += 1;
        return None;
    };
    let Ok(osm_id) = u64::from_str_radix(key, 16) else {
        log::warn!("cannot read osm id, line: {line}");
        stats.bad_osm_ids += 1;
        return None;
    };

    let entry = Entry::from_json(osm_id, json, builder, stats)?;
    stats.num_loaded += 1;
    Some(entry)
}

fn check_duplicate_osm_ids(entries: &[Entry], stats: &mut ParsingStats) {
    let mut i = 0;
    while i < entries.len() {
        let mut j = i + 1;
        while j < entries.len() && entries[i].osm_id == entries[j].osm_id {
            j += 1;
        }
        if j != i + 1 {
            stats.duplicate_osm_ids += 1;
            log::debug!(
                "duplicate osm id {:016X} occurs as a key in {} entries",
                entries[i].osm_id,
                j - i
            );
        }
        i = j;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DATA: &str = "\
C00000000004B279 {\"properties\": {\"kind\": \"country\", \"locales\": {\"default\": {\"name\": \"Cuba\", \"address\": {\"country\": \"Cuba\"}}}, \"rank\": 1}}
broken line without id
C00000000059D6B5 {\"properties\": {\"kind\": \"district\", \"locales\": {\"default\": {\"name\": \"Florencia\", \"address\": {\"subregion\": \"Florencia\", \"country\": \"Cuba\"}}}}}
";

    #[test]
    fn reads_and_merges_chunks() {
        let reader = HierarchyReader::from_reader(Cursor::new(DATA), false).unwrap();
        let (hierarchy, stats) = reader.read(2).unwrap();
        assert_eq!(hierarchy.entries().len(), 2);
        assert_eq!(stats.num_loaded, 2);
        assert_eq!(stats.bad_osm_ids, 1);

        // Positions re-interned into one dictionary: "cuba" deduplicates
        // across the two entries.
        let country = hierarchy.entry_for_osm_id(0xC00000000004B279).unwrap();
        let district = hierarchy.entry_for_osm_id(0xC00000000059D6B5).unwrap();
        assert_eq!(
            country.normalized_address[crate::types::Type::Country as usize],
            district.normalized_address[crate::types::Type::Country as usize],
        );
    }

    #[test]
    fn version_headline() {
        let data = format!("version 201005\n{DATA}");
        let reader = HierarchyReader::from_reader(Cursor::new(data), true).unwrap();
        let (hierarchy, _) = reader.read(1).unwrap();
        assert_eq!(hierarchy.data_version(), "201005");
    }

    #[test]
    fn missing_version_is_an_error() {
        let result = HierarchyReader::from_reader(Cursor::new("10 {}\n"), true);
        assert!(matches!(result, Err(GeocoderError::NoVersion)));
    }
}
