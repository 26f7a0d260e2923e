use crate::model::{EntityKind, Member, OsmElement};
use crate::OsmError;
use memmap2::Mmap;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

// o5m dataset type bytes.
const DS_NODE: u8 = 0x10;
const DS_WAY: u8 = 0x11;
const DS_RELATION: u8 = 0x12;
const DS_BBOX: u8 = 0xDB;
const DS_TIMESTAMP: u8 = 0xDC;
const DS_HEADER: u8 = 0xE0;
const DS_EOF: u8 = 0xFE;
const DS_RESET: u8 = 0xFF;

const STRING_TABLE_CAPACITY: usize = 15_000;
const STRING_TABLE_MAX_LENGTH: usize = 250;
const COORD_SCALE: f64 = 1e7;

/// Streams an o5m dump. The format delta-codes ids, coordinates and member
/// references and interns recent strings in a reference table, so decoding
/// is inherently sequential; parallel ingestion re-reads the stream per
/// worker and partitions elements by chunk (see `for_each_chunked`).
pub fn for_each<F>(path: &Path, processor: F) -> Result<(), OsmError>
where
    F: FnMut(OsmElement),
{
    for_each_chunked(path, 1, 0, 1, processor)
}

/// Decodes the whole stream but hands to `processor` only the elements whose
/// running chunk `(index / chunk_size) % task_count` equals `task_id`.
pub fn for_each_chunked<F>(
    path: &Path,
    task_count: usize,
    task_id: usize,
    chunk_size: usize,
    mut processor: F,
) -> Result<(), OsmError>
where
    F: FnMut(OsmElement),
{
    let file = File::open(path).map_err(OsmError::io(path.display().to_string()))?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(OsmError::io("o5m mmap"))?;
    let mut decoder = Decoder::new(&mmap);

    let mut element_counter = 0usize;
    while let Some(element) = decoder.next_element()? {
        let chunk = element_counter / chunk_size;
        if chunk % task_count == task_id {
            processor(element);
        }
        element_counter += 1;
    }
    Ok(())
}

#[derive(Default)]
struct DeltaState {
    node_id: i64,
    way_id: i64,
    relation_id: i64,
    lon: i64,
    lat: i64,
    way_node_ref: i64,
    relation_refs: [i64; 3],
    timestamp: i64,
    changeset: i64,
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    deltas: DeltaState,
    strings: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Decoder<'a> {
        Decoder {
            data,
            pos: 0,
            deltas: DeltaState::default(),
            strings: VecDeque::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> OsmError {
        OsmError::MalformedSource {
            format: "o5m",
            offset: self.pos as u64,
            message: message.into(),
        }
    }

    fn next_element(&mut self) -> Result<Option<OsmElement>, OsmError> {
        loop {
            let Some(&dataset) = self.data.get(self.pos) else {
                return Ok(None);
            };
            self.pos += 1;

            match dataset {
                DS_RESET => {
                    self.deltas = DeltaState::default();
                    self.strings.clear();
                }
                DS_EOF => return Ok(None),
                DS_NODE | DS_WAY | DS_RELATION | DS_BBOX | DS_TIMESTAMP | DS_HEADER => {
                    let length = self.read_uvarint()? as usize;
                    let end = self.pos + length;
                    if end > self.data.len() {
                        return Err(self.error("dataset length beyond file"));
                    }
                    match dataset {
                        DS_NODE => return self.read_node(end).map(Some),
                        DS_WAY => return self.read_way(end).map(Some),
                        DS_RELATION => return self.read_relation(end).map(Some),
                        _ => self.pos = end,
                    }
                }
                other => return Err(self.error(format!("unknown dataset byte {other:#x}"))),
            }
        }
    }

    fn read_node(&mut self, end: usize) -> Result<OsmElement, OsmError> {
        self.deltas.node_id += self.read_svarint()?;
        let id = self.deltas.node_id;
        self.skip_version_info()?;
        self.deltas.lon += self.read_svarint()?;
        self.deltas.lat += self.read_svarint()?;

        let mut element = OsmElement {
            kind: EntityKind::Node,
            id: id as u64,
            lat: self.deltas.lat as f64 / COORD_SCALE,
            lon: self.deltas.lon as f64 / COORD_SCALE,
            ..OsmElement::default()
        };
        self.read_tags(end, &mut element)?;
        Ok(element)
    }

    fn read_way(&mut self, end: usize) -> Result<OsmElement, OsmError> {
        self.deltas.way_id += self.read_svarint()?;
        let id = self.deltas.way_id;
        self.skip_version_info()?;

        let refs_length = self.read_uvarint()? as usize;
        let refs_end = self.pos + refs_length;
        if refs_end > end {
            return Err(self.error("way reference section beyond dataset"));
        }
        let mut element = OsmElement {
            kind: EntityKind::Way,
            id: id as u64,
            ..OsmElement::default()
        };
        while self.pos < refs_end {
            self.deltas.way_node_ref += self.read_svarint()?;
            element.node_refs.push(self.deltas.way_node_ref as u64);
        }
        self.read_tags(end, &mut element)?;
        Ok(element)
    }

    fn read_relation(&mut self, end: usize) -> Result<OsmElement, OsmError> {
        self.deltas.relation_id += self.read_svarint()?;
        let id = self.deltas.relation_id;
        self.skip_version_info()?;

        let refs_length = self.read_uvarint()? as usize;
        let refs_end = self.pos + refs_length;
        if refs_end > end {
            return Err(self.error("relation reference section beyond dataset"));
        }
        let mut element = OsmElement {
            kind: EntityKind::Relation,
            id: id as u64,
            ..OsmElement::default()
        };
        while self.pos < refs_end {
            let delta = self.read_svarint()?;
            let role_string = self.read_single_string()?;
            let (&type_char, role) = role_string
                .split_first()
                .ok_or_else(|| self.error("empty relation member string"))?;
            let slot = match type_char {
                b'0' => 0,
                b'1' => 1,
                b'2' => 2,
                other => return Err(self.error(format!("bad member type char {other:#x}"))),
            };
            self.deltas.relation_refs[slot] += delta;
            element.members.push(Member {
                reference: self.deltas.relation_refs[slot] as u64,
                kind: match slot {
                    0 => EntityKind::Node,
                    1 => EntityKind::Way,
                    _ => EntityKind::Relation,
                },
                role: String::from_utf8_lossy(role).into_owned(),
            });
        }
        self.read_tags(end, &mut element)?;
        Ok(element)
    }

    fn read_tags(&mut self, end: usize, element: &mut OsmElement) -> Result<(), OsmError> {
        while self.pos < end {
            let (key, value) = self.read_string_pair()?;
            element.add_tag(
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            );
        }
        self.pos = end;
        Ok(())
    }

    fn skip_version_info(&mut self) -> Result<(), OsmError> {
        let version = self.read_uvarint()?;
        if version == 0 {
            return Ok(());
        }
        self.deltas.timestamp += self.read_svarint()?;
        if self.deltas.timestamp != 0 {
            self.deltas.changeset += self.read_svarint()?;
            let _ = self.read_string_pair()?;
        }
        Ok(())
    }

    fn read_string_pair(&mut self) -> Result<(Vec<u8>, Vec<u8>), OsmError> {
        let reference = self.read_uvarint()? as usize;
        if reference == 0 {
            let first = self.read_zero_terminated()?;
            let second = self.read_zero_terminated()?;
            self.intern(first.clone(), second.clone());
            return Ok((first, second));
        }
        self.lookup(reference)
    }

    fn read_single_string(&mut self) -> Result<Vec<u8>, OsmError> {
        let reference = self.read_uvarint()? as usize;
        if reference == 0 {
            let value = self.read_zero_terminated()?;
            self.intern(value.clone(), Vec::new());
            return Ok(value);
        }
        Ok(self.lookup(reference)?.0)
    }

    fn intern(&mut self, first: Vec<u8>, second: Vec<u8>) {
        if first.len() + second.len() > STRING_TABLE_MAX_LENGTH {
            return;
        }
        if self.strings.len() == STRING_TABLE_CAPACITY {
            self.strings.pop_front();
        }
        self.strings.push_back((first, second));
    }

    fn lookup(&self, reference: usize) -> Result<(Vec<u8>, Vec<u8>), OsmError> {
        self.strings
            .len()
            .checked_sub(reference)
            .and_then(|i| self.strings.get(i))
            .cloned()
            .ok_or_else(|| self.error(format!("string reference {reference} out of table")))
    }

    fn read_zero_terminated(&mut self) -> Result<Vec<u8>, OsmError> {
        let start = self.pos;
        while let Some(&byte) = self.data.get(self.pos) {
            self.pos += 1;
            if byte == 0 {
                return Ok(self.data[start..self.pos - 1].to_vec());
            }
        }
        Err(self.error("unterminated string"))
    }

    fn read_uvarint(&mut self) -> Result<u64, OsmError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let &byte = self
                .data
                .get(self.pos)
                .ok_or_else(|| self.error("truncated varint"))?;
            self.pos += 1;
            if shift >= 64 {
                return Err(self.error("varint overflow"));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_svarint(&mut self) -> Result<i64, OsmError> {
        let raw = self.read_uvarint()?;
        if raw & 1 == 0 {
            Ok((raw >> 1) as i64)
        } else {
            Ok(-((raw >> 1) as i64) - 1)
        }
    }
}
