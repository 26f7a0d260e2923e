use crate::cell::CellValuePair;
use crate::coding::{write_varint, write_varuint};
use crate::CoreError;
use std::io::{Seek, SeekFrom, Write};

// On-disk layout:
//
//   +------------------------------+
//   |            Header            |
//   +------------------------------+
//   |   Level offsets (levels+2)   |
//   +------------------------------+
//   |         Leaves data          |
//   +------------------------------+
//   |         Level 1 data         |
//   +------------------------------+
//   |             ...              |
//   +------------------------------+
//   |    Level N data (the root)   |
//   +------------------------------+
//
// Header bytes: version, levels, bitsPerLevel, leafBytes. Offsets are
// absolute file positions, 32-bit in V1 and 64-bit in V2. V2 is required
// once the sorted pair corpus exceeds 4 GiB.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalIndexVersion {
    V1 = 1,
    V2 = 2,
}

pub struct IntervalIndexBuilder {
    version: IntervalIndexVersion,
    levels: u32,
    bits_per_level: u32,
    leaf_bytes: u32,
}

impl IntervalIndexBuilder {
    pub fn new(
        version: IntervalIndexVersion,
        key_bits: u32,
        leaf_bytes: u32,
        bits_per_level: u32,
    ) -> IntervalIndexBuilder {
        assert!(leaf_bytes > 0);
        assert!(key_bits < 63);
        assert!((3..=8).contains(&bits_per_level));
        let node_key_bits = key_bits
            .checked_sub(leaf_bytes * 8)
            .filter(|&bits| bits > 0)
            .unwrap_or_else(|| panic!("key_bits {key_bits} too small for {leaf_bytes} leaf bytes"));
        let levels = (node_key_bits + bits_per_level - 1) / bits_per_level;
        IntervalIndexBuilder {
            version,
            levels,
            bits_per_level,
            leaf_bytes,
        }
    }

    pub fn level_count(&self) -> u32 {
        self.levels
    }

    /// Builds the index from pairs sorted ascending by (cell, value).
    /// Duplicate (cell, value) pairs are collapsed.
    pub fn build<W: Write + Seek>(
        &self,
        writer: &mut W,
        pairs: &[CellValuePair],
    ) -> Result<(), CoreError> {
        if pairs.is_empty() {
            writer
                .write_all(&[self.version as u8, 0, 0, 0])
                .map_err(CoreError::io("index header"))?;
            return Ok(());
        }

        let offset_bytes = match self.version {
            IntervalIndexVersion::V1 => 4,
            IntervalIndexVersion::V2 => 8,
        } as u64;
        let header_len = 4 + offset_bytes * u64::from(self.levels + 2);

        let initial_pos = writer
            .stream_position()
            .map_err(CoreError::io("index position"))?;
        writer
            .write_all(&vec![0u8; header_len as usize])
            .map_err(CoreError::io("index header space"))?;

        let mut level_offsets = Vec::with_capacity(self.levels as usize + 2);
        level_offsets.push(initial_pos + header_len);

        // Leaves: runs of low key bytes + zigzag value deltas, grouped by
        // the key's node prefix.
        let (leaves, mut children) = self.build_leaves(pairs)?;
        writer
            .write_all(&leaves)
            .map_err(CoreError::io("index leaves"))?;
        level_offsets.push(level_offsets[0] + leaves.len() as u64);

        // Higher levels: one node per parent with non-empty children.
        for _level in 1..=self.levels {
            let (level_data, parents) = self.build_level(&children)?;
            writer
                .write_all(&level_data)
                .map_err(CoreError::io("index level"))?;
            level_offsets.push(*level_offsets.last().unwrap() + level_data.len() as u64);
            children = parents;
        }
        debug_assert_eq!(children.len(), 1, "root level must collapse to one node");

        let last_pos = writer
            .stream_position()
            .map_err(CoreError::io("index position"))?;
        writer
            .seek(SeekFrom::Start(initial_pos))
            .map_err(CoreError::io("index seek"))?;

        writer
            .write_all(&[
                self.version as u8,
                self.levels as u8,
                self.bits_per_level as u8,
                self.leaf_bytes as u8,
            ])
            .map_err(CoreError::io("index header"))?;
        for offset in &level_offsets {
            match self.version {
                IntervalIndexVersion::V1 => {
                    let offset = u32::try_from(*offset).map_err(|_| {
                        CoreError::InvariantViolation(format!(
                            "V1 index offset {offset} exceeds 32 bits"
                        ))
                    })?;
                    writer
                        .write_all(&offset.to_le_bytes())
                        .map_err(CoreError::io("index offsets"))?;
                }
                IntervalIndexVersion::V2 => {
                    writer
                        .write_all(&offset.to_le_bytes())
                        .map_err(CoreError::io("index offsets"))?;
                }
            }
        }
        writer
            .seek(SeekFrom::Start(last_pos))
            .map_err(CoreError::io("index seek"))?;
        Ok(())
    }

    /// Returns the serialized leaves and the (node key, byte size) list of
    /// leaf groups, ascending by key.
    fn build_leaves(&self, pairs: &[CellValuePair]) -> Result<(Vec<u8>, Vec<(u64, u64)>), CoreError> {
        let skip_bits = self.leaf_bytes * 8;
        let key_bits = skip_bits + self.levels * self.bits_per_level;

        let mut leaves = Vec::new();
        let mut groups: Vec<(u64, u64)> = Vec::new();
        let mut prev_key = 0u64;
        let mut prev_value = 0u64;
        let mut group_start = 0usize;

        for pair in pairs {
            let key = pair.cell;
            if key == 0 {
                return Err(CoreError::InvariantViolation("zero cell key".into()));
            }
            if key_bits < 64 && key >= 1u64 << key_bits {
                return Err(CoreError::InvariantViolation(format!(
                    "cell key {key:#x} exceeds {key_bits} key bits"
                )));
            }
            if key < prev_key {
                return Err(CoreError::InvariantViolation("unsorted cell keys".into()));
            }
            if key == prev_key && pair.value == prev_value && prev_key != 0 {
                continue;
            }

            if prev_key != 0 && (key >> skip_bits) != (prev_key >> skip_bits) {
                groups.push((prev_key >> skip_bits, (leaves.len() - group_start) as u64));
                group_start = leaves.len();
                prev_value = 0;
            }

            let low = key.to_le_bytes();
            leaves.extend_from_slice(&low[..self.leaf_bytes as usize]);
            // Ids use their top bits for the source kind, so deltas wrap.
            write_varint(&mut leaves, pair.value.wrapping_sub(prev_value) as i64)?;
            prev_key = key;
            prev_value = pair.value;
        }
        groups.push((prev_key >> skip_bits, (leaves.len() - group_start) as u64));

        Ok((leaves, groups))
    }

    /// Builds one internal level from the (key, size) children of the level
    /// below. Returns the level bytes and the parents' (key, size) list.
    fn build_level(&self, children: &[(u64, u64)]) -> Result<(Vec<u8>, Vec<(u64, u64)>), CoreError> {
        let fanout = 1usize << self.bits_per_level;
        let mask = (fanout - 1) as u64;

        let mut data = Vec::new();
        let mut parents = Vec::new();

        let mut child_offset = 0u64;
        let mut i = 0;
        while i < children.len() {
            let parent_key = children[i].0 >> self.bits_per_level;
            let mut child_sizes = vec![0u64; fanout];
            let node_offset = child_offset;
            while i < children.len() && children[i].0 >> self.bits_per_level == parent_key {
                let slot = (children[i].0 & mask) as usize;
                debug_assert_eq!(child_sizes[slot], 0);
                child_sizes[slot] = children[i].1;
                child_offset += children[i].1;
                i += 1;
            }
            let node_size = self.write_node(&mut data, node_offset, &child_sizes)?;
            parents.push((parent_key, node_size));
        }

        Ok((data, parents))
    }

    /// Serializes a node in whichever of the two forms is shorter, bitmap
    /// winning ties.
    pub fn write_node<W: Write>(
        &self,
        sink: &mut W,
        offset: u64,
        child_sizes: &[u64],
    ) -> Result<u64, CoreError> {
        let mut bitmap = Vec::with_capacity(64);
        let mut list = Vec::with_capacity(64);
        self.write_bitmap_node(&mut bitmap, offset, child_sizes)?;
        self.write_list_node(&mut list, offset, child_sizes)?;
        let chosen = if bitmap.len() <= list.len() { &bitmap } else { &list };
        sink.write_all(chosen).map_err(CoreError::io("index node"))?;
        Ok(chosen.len() as u64)
    }

    pub fn write_bitmap_node<W: Write>(
        &self,
        sink: &mut W,
        offset: u64,
        child_sizes: &[u64],
    ) -> Result<(), CoreError> {
        self.check_offset(offset)?;
        write_varuint(sink, (offset << 1) | 1)?;

        let mut mask = vec![0u8; 1 << (self.bits_per_level - 3)];
        for (i, &size) in child_sizes.iter().enumerate() {
            if size != 0 {
                mask[i >> 3] |= 1 << (i & 7);
            }
        }
        sink.write_all(&mask).map_err(CoreError::io("node bitmap"))?;

        for &size in child_sizes {
            if size != 0 {
                self.check_size(size)?;
                write_varuint(sink, size)?;
            }
        }
        Ok(())
    }

    pub fn write_list_node<W: Write>(
        &self,
        sink: &mut W,
        offset: u64,
        child_sizes: &[u64],
    ) -> Result<(), CoreError> {
        self.check_offset(offset)?;
        write_varuint(sink, offset << 1)?;

        for (i, &size) in child_sizes.iter().enumerate() {
            if size != 0 {
                self.check_size(size)?;
                sink.write_all(&[i as u8]).map_err(CoreError::io("node list"))?;
                write_varuint(sink, size)?;
            }
        }
        Ok(())
    }

    fn check_offset(&self, offset: u64) -> Result<(), CoreError> {
        let limit = match self.version {
            IntervalIndexVersion::V1 => u64::from(u32::MAX >> 1),
            IntervalIndexVersion::V2 => u64::MAX >> 1,
        };
        if offset > limit {
            return Err(CoreError::InvariantViolation(format!(
                "node offset {offset} out of range for {:?}",
                self.version
            )));
        }
        Ok(())
    }

    fn check_size(&self, size: u64) -> Result<(), CoreError> {
        if self.version == IntervalIndexVersion::V1 && size > u64::from(u32::MAX) {
            return Err(CoreError::InvariantViolation(format!(
                "node size {size} out of range for V1"
            )));
        }
        Ok(())
    }
}

/// Builds an index keyed by cell codes at the given tree depth, in the V2
/// layout planet-scale corpora need.
pub fn build_interval_index<W: Write + Seek>(
    writer: &mut W,
    pairs: &[CellValuePair],
    depth: usize,
) -> Result<(), CoreError> {
    let key_bits = (2 * depth + 1) as u32;
    IntervalIndexBuilder::new(IntervalIndexVersion::V2, key_bits, 1, 8).build(writer, pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn builder(key_bits: u32, leaf_bytes: u32, bits_per_level: u32) -> IntervalIndexBuilder {
        IntervalIndexBuilder::new(IntervalIndexVersion::V1, key_bits, leaf_bytes, bits_per_level)
    }

    #[test]
    fn level_count() {
        assert_eq!(builder(10, 1, 3).level_count(), 1);
        assert_eq!(builder(11, 1, 3).level_count(), 1);
        assert_eq!(builder(12, 1, 3).level_count(), 2);
        assert_eq!(builder(19, 2, 3).level_count(), 1);
        assert_eq!(builder(19, 1, 3).level_count(), 4);
        assert_eq!(builder(20, 1, 3).level_count(), 4);
    }

    #[test]
    fn serialized_node_bitmap() {
        let offset = 350u64;
        let mut child_sizes = [0u64; 8];
        child_sizes[3] = 10;
        child_sizes[6] = 1000;
        let mut serial = Vec::new();
        builder(11, 1, 3)
            .write_node(&mut serial, offset, &child_sizes)
            .unwrap();
        assert_eq!(serial, b"\xBD\x05\x48\x0A\xE8\x07");
    }

    #[test]
    fn serialized_node_bitmap_v2() {
        let offset = 5_547_468_350u64;
        let mut child_sizes = [0u64; 8];
        child_sizes[3] = 10;
        child_sizes[6] = 6_200_000_000;
        let mut serial = Vec::new();
        IntervalIndexBuilder::new(IntervalIndexVersion::V2, 11, 1, 3)
            .write_node(&mut serial, offset, &child_sizes)
            .unwrap();
        assert_eq!(serial, b"\xFD\x98\xBD\xAA\x29\x48\x0A\x80\xFC\xB1\x8C\x17");
    }

    #[test]
    fn serialized_node_list() {
        let offset = 350u64;
        let mut child_sizes = [0u64; 16];
        child_sizes[6] = 1000;
        let mut serial = Vec::new();
        builder(11, 1, 4)
            .write_node(&mut serial, offset, &child_sizes)
            .unwrap();
        assert_eq!(serial, b"\xBC\x05\x06\xE8\x07");
    }

    #[test]
    fn serialized_node_list_v2() {
        let offset = 5_547_468_350u64;
        let mut child_sizes = [0u64; 16];
        child_sizes[7] = 6_200_000_000;
        let mut serial = Vec::new();
        IntervalIndexBuilder::new(IntervalIndexVersion::V2, 11, 1, 4)
            .write_node(&mut serial, offset, &child_sizes)
            .unwrap();
        assert_eq!(serial, b"\xFC\x98\xBD\xAA\x29\x07\x80\xFC\xB1\x8C\x17");
    }

    #[test]
    fn serialized_index() {
        let pairs = vec![
            CellValuePair::new(0x1537, 0),
            CellValuePair::new(0x1538, 1),
            CellValuePair::new(0x1637, 2),
        ];
        let mut cursor = Cursor::new(Vec::new());
        builder(16, 1, 4).build(&mut cursor, &pairs).unwrap();
        let expected: &[u8] = &[
            0x01, 0x02, 0x04, 0x01, // header
            0x14, 0x00, 0x00, 0x00, // leaves offset
            0x1A, 0x00, 0x00, 0x00, // level 1 offset
            0x1F, 0x00, 0x00, 0x00, // root offset
            0x22, 0x00, 0x00, 0x00, // end offset
            0x37, 0x00, 0x38, 0x02, 0x37, 0x04, // leaves
            0x01, 0x60, 0x00, 0x04, 0x02, // 0x15, 0x16 node
            0x00, 0x01, 0x05, // root
        ];
        assert_eq!(cursor.into_inner(), expected);
    }

    #[test]
    fn serialized_index_v2() {
        let pairs = vec![
            CellValuePair::new(0x1537, 0),
            CellValuePair::new(0x1538, 1),
            CellValuePair::new(0x1637, 2),
        ];
        let mut cursor = Cursor::new(Vec::new());
        IntervalIndexBuilder::new(IntervalIndexVersion::V2, 16, 1, 4)
            .build(&mut cursor, &pairs)
            .unwrap();
        let expected: &[u8] = &[
            0x02, 0x02, 0x04, 0x01, // header
            0x24, 0, 0, 0, 0, 0, 0, 0, // leaves offset
            0x2A, 0, 0, 0, 0, 0, 0, 0, // level 1 offset
            0x2F, 0, 0, 0, 0, 0, 0, 0, // root offset
            0x32, 0, 0, 0, 0, 0, 0, 0, // end offset
            0x37, 0x00, 0x38, 0x02, 0x37, 0x04, // leaves
            0x01, 0x60, 0x00, 0x04, 0x02, // 0x15, 0x16 node
            0x00, 0x01, 0x05, // root
        ];
        assert_eq!(cursor.into_inner(), expected);
    }
}
