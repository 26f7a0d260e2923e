use crate::CoreError;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

/// One record of a key-value file: the 64-bit object id and its parsed
/// GeoJSON value.
pub type KeyValue = (u64, Arc<serde_json::Value>);

/// Formats an id the way every KV file and `dref` field spells it.
pub fn serialize_id(id: u64) -> String {
    format!("{id:016X}")
}

/// In-memory load of a `.jsonl` / `.jsonl.gz` key-value file.
///
/// Line format: `<16-uppercase-hex-id> <json>`. An optional leading
/// `version <string>` line is skipped here (the geocoder reader consumes it
/// when asked to). Malformed lines are counted, logged once per batch and
/// skipped.
pub struct KeyValueStorage {
    values: HashMap<u64, Arc<serde_json::Value>>,
}

impl KeyValueStorage {
    pub fn open(path: &Path) -> Result<KeyValueStorage, CoreError> {
        let file = File::open(path).map_err(CoreError::io(path.display().to_string()))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::from_reader(BufReader::new(reader))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<KeyValueStorage, CoreError> {
        let mut values = HashMap::new();
        let mut bad_lines = 0u64;
        for (line_number, line) in reader.lines().enumerate() {
            let line = line.map_err(CoreError::io("kv line"))?;
            if line.is_empty() {
                continue;
            }
            if line_number == 0 && line.starts_with("version ") {
                continue;
            }
            match parse_key_value_line(&line) {
                Some((key, value)) => {
                    values.insert(key, Arc::new(value));
                }
                None => {
                    bad_lines += 1;
                    if bad_lines.is_power_of_two() {
                        log::warn!("malformed kv line {}: {line}", line_number + 1);
                    }
                }
            }
        }
        if bad_lines > 0 {
            log::warn!("skipped {bad_lines} malformed kv lines");
        }
        Ok(KeyValueStorage { values })
    }

    pub fn find(&self, key: u64) -> Option<Arc<serde_json::Value>> {
        self.values.get(&key).cloned()
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Arc<serde_json::Value>)> {
        self.values.iter()
    }
}

fn parse_key_value_line(line: &str) -> Option<(u64, serde_json::Value)> {
    let (key, json) = line.split_once(' ')?;
    let key = u64::from_str_radix(key, 16).ok()?;
    let value = serde_json::from_str(json).ok()?;
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_lines_and_skips_garbage() {
        let data = "\
C00000000004B279 {\"properties\": {\"kind\": \"country\"}}
not-a-line
C0000000001C4CA7 {\"properties\": {\"kind\": \"province\"}}
";
        let storage = KeyValueStorage::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(storage.size(), 2);
        let country = storage.find(0xC00000000004B279).unwrap();
        assert_eq!(country["properties"]["kind"], "country");
        assert!(storage.find(0xDEAD).is_none());
    }

    #[test]
    fn skips_version_headline() {
        let data = "version 201005\n10 {\"a\": 1}\n";
        let storage = KeyValueStorage::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(storage.size(), 1);
    }

    #[test]
    fn id_formatting() {
        assert_eq!(serialize_id(0xC00000000004B279), "C00000000004B279");
        assert_eq!(serialize_id(0x10), "0000000000000010");
    }
}
