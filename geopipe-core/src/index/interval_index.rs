use crate::coding::varint;
use crate::CoreError;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Read side of the on-disk interval index. The whole file is held as one
/// byte region (mmap for real indexes, an owned buffer in tests) and decoded
/// on the fly; readers are lock-free and shareable across threads.
pub struct IntervalIndex<B: AsRef<[u8]>> {
    data: B,
    version: u8,
    levels: u8,
    bits_per_level: u8,
    leaf_bytes: u8,
    level_offsets: Vec<u64>,
}

impl IntervalIndex<Mmap> {
    /// Maps an index file read-only. The readahead hint is issued from a
    /// detached thread so callers never wait on it.
    pub fn open(path: &Path) -> Result<IntervalIndex<Mmap>, CoreError> {
        let file = File::open(path).map_err(CoreError::io(path.display().to_string()))?;
        let mmap =
            unsafe { Mmap::map(&file) }.map_err(CoreError::io(path.display().to_string()))?;
        crate::readahead::spawn_willneed_hint(&mmap);
        IntervalIndex::from_data(mmap)
    }
}

impl<B: AsRef<[u8]>> IntervalIndex<B> {
    pub fn from_data(data: B) -> Result<IntervalIndex<B>, CoreError> {
        let bytes = data.as_ref();
        if bytes.len() < 4 {
            return Err(CoreError::BadFormat("interval index shorter than header".into()));
        }
        let (version, levels, bits_per_level, leaf_bytes) =
            (bytes[0], bytes[1], bytes[2], bytes[3]);
        if version != 1 && version != 2 {
            return Err(CoreError::UnsupportedVersion(version));
        }

        let mut level_offsets = Vec::new();
        if levels > 0 {
            let offset_bytes = if version == 1 { 4 } else { 8 };
            let table_len = offset_bytes * (levels as usize + 2);
            let table = bytes
                .get(4..4 + table_len)
                .ok_or_else(|| CoreError::BadFormat("truncated offset table".into()))?;
            for chunk in table.chunks(offset_bytes) {
                let offset = if version == 1 {
                    u64::from(u32::from_le_bytes(chunk.try_into().unwrap()))
                } else {
                    u64::from_le_bytes(chunk.try_into().unwrap())
                };
                if offset as usize > bytes.len() {
                    return Err(CoreError::BadFormat("offset beyond file".into()));
                }
                level_offsets.push(offset);
            }
        }

        Ok(IntervalIndex {
            data,
            version,
            levels,
            bits_per_level,
            leaf_bytes,
            level_offsets,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// One past the largest representable key.
    pub fn key_end(&self) -> u64 {
        if self.levels == 0 {
            return 0;
        }
        let key_bits =
            u32::from(self.leaf_bytes) * 8 + u32::from(self.levels) * u32::from(self.bits_per_level);
        1u64 << key_bits
    }

    /// Emits every value whose key lies in [begin, end).
    pub fn for_each_in_range<F: FnMut(u64, u64)>(
        &self,
        begin: u64,
        end: u64,
        f: &mut F,
    ) -> Result<(), CoreError> {
        if self.levels == 0 || begin >= end {
            return Ok(());
        }
        let root_region = self.level_region(self.levels)?;
        self.walk_node(self.levels, root_region, 0, begin, end, f)
    }

    /// Emits every value stored under an exact key.
    pub fn for_each_at_key<F: FnMut(u64)>(&self, key: u64, f: &mut F) -> Result<(), CoreError> {
        self.for_each_in_range(key, key + 1, &mut |_, value| f(value))
    }

    fn level_region(&self, level: u8) -> Result<(usize, usize), CoreError> {
        let start = self.level_offsets[level as usize] as usize;
        let end = self.level_offsets[level as usize + 1] as usize;
        if start > end || end > self.data.as_ref().len() {
            return Err(CoreError::BadFormat("bad level region".into()));
        }
        Ok((start, end))
    }

    /// Number of key bits below the children of a node at `level`.
    fn bits_below_children(&self, level: u8) -> u32 {
        u32::from(self.leaf_bytes) * 8 + u32::from(level - 1) * u32::from(self.bits_per_level)
    }

    fn walk_node<F: FnMut(u64, u64)>(
        &self,
        level: u8,
        region: (usize, usize),
        node_key: u64,
        begin: u64,
        end: u64,
        f: &mut F,
    ) -> Result<(), CoreError> {
        if level == 0 {
            return self.scan_leaf_group(region, node_key, begin, end, f);
        }

        let bytes = &self.data.as_ref()[region.0..region.1];
        let mut cursor = bytes;
        let offset_and_flag = varint::read_varuint(&mut cursor)?;
        let child_base = offset_and_flag >> 1;
        let is_bitmap = offset_and_flag & 1 == 1;

        let mut children: Vec<(u8, u64)> = Vec::new();
        if is_bitmap {
            let mask_len = 1usize << (self.bits_per_level - 3);
            if cursor.len() < mask_len {
                return Err(CoreError::BadFormat("truncated bitmap node".into()));
            }
            let (mask, rest) = cursor.split_at(mask_len);
            cursor = rest;
            for i in 0..(1usize << self.bits_per_level) {
                if mask[i >> 3] & (1 << (i & 7)) != 0 {
                    let size = varint::read_varuint(&mut cursor)?;
                    children.push((i as u8, size));
                }
            }
        } else {
            while !cursor.is_empty() {
                let index = cursor[0];
                cursor = &cursor[1..];
                let size = varint::read_varuint(&mut cursor)?;
                children.push((index, size));
            }
        }

        let below = self.bits_below_children(level);
        let (child_level_start, child_level_end) = self.level_region(level - 1)?;
        let mut child_offset = child_base;
        for (index, size) in children {
            let child_key = (node_key << self.bits_per_level) | u64::from(index);
            let key_lo = child_key << below;
            let key_hi = key_lo + (1u64 << below);
            if key_lo < end && begin < key_hi {
                let start = child_level_start + child_offset as usize;
                let stop = start + size as usize;
                if stop > child_level_end {
                    return Err(CoreError::BadFormat("child range beyond level".into()));
                }
                self.walk_node(level - 1, (start, stop), child_key, begin, end, f)?;
            }
            child_offset += size;
        }
        Ok(())
    }

    fn scan_leaf_group<F: FnMut(u64, u64)>(
        &self,
        region: (usize, usize),
        group_key: u64,
        begin: u64,
        end: u64,
        f: &mut F,
    ) -> Result<(), CoreError> {
        let bytes = &self.data.as_ref()[region.0..region.1];
        let mut cursor = bytes;
        let leaf_bytes = self.leaf_bytes as usize;
        let mut value = 0u64;
        while !cursor.is_empty() {
            if cursor.len() < leaf_bytes {
                return Err(CoreError::BadFormat("truncated leaf entry".into()));
            }
            let mut low = [0u8; 8];
            low[..leaf_bytes].copy_from_slice(&cursor[..leaf_bytes]);
            cursor = &cursor[leaf_bytes..];
            let delta = varint::read_varint(&mut cursor)?;
            value = value.wrapping_add(delta as u64);

            let key = (group_key << (self.leaf_bytes * 8)) | u64::from_le_bytes(low);
            if key >= begin && key < end {
                f(key, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValuePair;
    use crate::index::interval_index_builder::{
        IntervalIndexBuilder, IntervalIndexVersion,
    };
    use std::io::Cursor;

    fn build(pairs: &[CellValuePair], key_bits: u32) -> IntervalIndex<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        IntervalIndexBuilder::new(IntervalIndexVersion::V1, key_bits, 1, 8)
            .build(&mut cursor, pairs)
            .unwrap();
        IntervalIndex::from_data(cursor.into_inner()).unwrap()
    }

    fn collect(index: &IntervalIndex<Vec<u8>>, begin: u64, end: u64) -> Vec<u64> {
        let mut values = Vec::new();
        index
            .for_each_in_range(begin, end, &mut |_, v| values.push(v))
            .unwrap();
        values.sort_unstable();
        values
    }

    #[test]
    fn simple() {
        let pairs = vec![
            CellValuePair::new(0xA0B1C2D100, 0),
            CellValuePair::new(0xA0B1C2D200, 1),
            CellValuePair::new(0xA0B2C2D100, 2),
        ];
        let index = build(&pairs, 40);
        assert_eq!(index.key_end(), 0x100_0000_0000);
        assert_eq!(collect(&index, 0, index.key_end()), vec![0, 1, 2]);
        assert_eq!(collect(&index, 0xA0B1C2D100, 0xA0B1C2D201), vec![0, 1]);
        assert_eq!(collect(&index, 0, 0xA0B1C30000), vec![0, 1]);
        assert_eq!(collect(&index, 0xA0B1C2D100, 0xA0B1C2D101), vec![0]);
        assert_eq!(collect(&index, 0xA0B1C2D100, 0xA0B1C2D200), vec![0]);
        assert!(collect(&index, 0xA0B1C2D100, 0xA0B1C2D100).is_empty());
        assert!(collect(&index, 0xA0B1000000, 0xA0B1B20000).is_empty());
    }

    #[test]
    fn duplicate_keys_distinct_values() {
        let pairs = vec![
            CellValuePair::new(0xA0B1C2D200, 0),
            CellValuePair::new(0xA0B1C2D200, 1),
            CellValuePair::new(0xA0B1C2D200, 3),
            CellValuePair::new(0xA0B2C2D200, 2),
        ];
        let index = build(&pairs, 40);
        assert_eq!(collect(&index, 0, 0xFF_FFFF_FFFF), vec![0, 1, 2, 3]);
    }

    #[test]
    fn duplicate_pairs_are_collapsed() {
        let pairs = vec![
            CellValuePair::new(0x0100, 7),
            CellValuePair::new(0x0100, 7),
            CellValuePair::new(0x0200, 1),
        ];
        let index = build(&pairs, 40);
        assert_eq!(collect(&index, 0, 0xFF_FFFF_FFFF), vec![1, 7]);
        assert_eq!(collect(&index, 0x0100, 0x0101), vec![7]);
    }

    #[test]
    fn sparse_keys() {
        let pairs = vec![
            CellValuePair::new(0x01030400, 0),
            CellValuePair::new(0x02030400, 1),
        ];
        let index = build(&pairs, 40);
        assert_eq!(collect(&index, 0, 0xFF_FFFF_FFFF), vec![0, 1]);
        assert_eq!(collect(&index, 0x01030400, 0x01030401), vec![0]);
        assert_eq!(collect(&index, 0x02000000, 0x03000000), vec![1]);
    }

    #[test]
    fn empty_index() {
        let index = build(&[], 40);
        assert!(collect(&index, 0, 0xFF_FFFF_FFFF).is_empty());
        assert_eq!(index.key_end(), 0);
    }

    #[test]
    fn v2_round_trip() {
        let pairs = vec![
            CellValuePair::new(0x1537, 0),
            CellValuePair::new(0x1538, 1),
            CellValuePair::new(0x1637, 2),
        ];
        let mut cursor = Cursor::new(Vec::new());
        IntervalIndexBuilder::new(IntervalIndexVersion::V2, 16, 1, 4)
            .build(&mut cursor, &pairs)
            .unwrap();
        let index = IntervalIndex::from_data(cursor.into_inner()).unwrap();
        let mut values = Vec::new();
        index
            .for_each_in_range(0, 0x10000, &mut |_, v| values.push(v))
            .unwrap();
        assert_eq!(values, vec![0, 1, 2]);

        let mut exact = Vec::new();
        index.for_each_at_key(0x1538, &mut |v| exact.push(v)).unwrap();
        assert_eq!(exact, vec![1]);
    }

    #[test]
    fn every_stored_pair_is_found_at_its_key() {
        let mut pairs = Vec::new();
        for i in 0..512u64 {
            pairs.push(CellValuePair::new(0x100 + i * 37, i));
        }
        pairs.sort();
        let index = build(&pairs, 40);
        for pair in &pairs {
            let mut found = Vec::new();
            index
                .for_each_at_key(pair.cell, &mut |v| found.push(v))
                .unwrap();
            assert!(found.contains(&pair.value), "missing {pair:?}");
        }
    }
}
