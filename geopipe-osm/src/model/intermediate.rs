use geopipe_core::coding::{
    read_string, read_varuint, write_string, write_varuint,
};
use geopipe_core::CoreError;
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// A node after projection: mercator (y, x) in degrees-equivalent units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeElement {
    pub id: u64,
    pub y: f64,
    pub x: f64,
}

/// A way stripped down to its node-id sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WayElement {
    pub id: u64,
    pub nodes: Vec<u64>,
}

impl WayElement {
    pub fn new(id: u64) -> WayElement {
        WayElement { id, nodes: Vec::new() }
    }

    pub fn is_valid(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<(), CoreError> {
        write_varuint(sink, self.nodes.len() as u64)?;
        for &node in &self.nodes {
            write_varuint(sink, node)?;
        }
        Ok(())
    }

    /// Replaces this way's contents with the serialized form.
    pub fn read_from<R: Read>(&mut self, source: &mut R) -> Result<(), CoreError> {
        let count = read_varuint(source)? as usize;
        self.nodes.clear();
        self.nodes.reserve(count);
        for _ in 0..count {
            self.nodes.push(read_varuint(source)?);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMember {
    pub reference: u64,
    pub role: String,
}

impl RelationMember {
    pub fn new(reference: u64, role: impl Into<String>) -> RelationMember {
        RelationMember { reference, role: role.into() }
    }
}

/// A retained relation: node members, way members and the full tag map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationElement {
    pub nodes: Vec<RelationMember>,
    pub ways: Vec<RelationMember>,
    pub tags: BTreeMap<String, String>,
}

impl RelationElement {
    pub fn is_valid(&self) -> bool {
        !self.nodes.is_empty() || !self.ways.is_empty()
    }

    pub fn relation_type(&self) -> Option<&str> {
        self.tags.get("type").map(String::as_str)
    }

    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<(), CoreError> {
        write_members(sink, &self.nodes)?;
        write_members(sink, &self.ways)?;
        write_varuint(sink, self.tags.len() as u64)?;
        for (key, value) in &self.tags {
            write_string(sink, key)?;
            write_string(sink, value)?;
        }
        Ok(())
    }

    /// Replaces this relation's contents, tag map included.
    pub fn read_from<R: Read>(&mut self, source: &mut R) -> Result<(), CoreError> {
        self.nodes = read_members(source)?;
        self.ways = read_members(source)?;
        self.tags.clear();
        let tags = read_varuint(source)? as usize;
        for _ in 0..tags {
            let key = read_string(source)?;
            let value = read_string(source)?;
            self.tags.insert(key, value);
        }
        Ok(())
    }
}

fn write_members<W: Write>(sink: &mut W, members: &[RelationMember]) -> Result<(), CoreError> {
    write_varuint(sink, members.len() as u64)?;
    for member in members {
        write_varuint(sink, member.reference)?;
        write_string(sink, &member.role)?;
    }
    Ok(())
}

fn read_members<R: Read>(source: &mut R) -> Result<Vec<RelationMember>, CoreError> {
    let count = read_varuint(source)? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let reference = read_varuint(source)?;
        let role = read_string(source)?;
        members.push(RelationMember { reference, role });
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_way_round_trip() {
        let way = WayElement::new(1);
        let mut buffer = Vec::new();
        way.write_to(&mut buffer).unwrap();

        let mut restored = WayElement::new(1);
        restored.read_from(&mut buffer.as_slice()).unwrap();
        assert!(restored.nodes.is_empty());
    }

    #[test]
    fn way_round_trip() {
        let nodes = vec![0u64, 1, 2, 3, 0xFFFF_FFFF, 0xFFFF_FFFF_FFFF_FFFF];
        let mut way = WayElement::new(1);
        way.nodes = nodes.clone();

        let mut buffer = Vec::new();
        way.write_to(&mut buffer).unwrap();

        let mut restored = WayElement::new(1);
        restored.read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(restored.nodes, nodes);
    }

    #[test]
    fn relation_read_replaces_prior_contents() {
        let members = vec![
            RelationMember::new(1, "inner"),
            RelationMember::new(2, "outer"),
            RelationMember::new(3, "unknown"),
            RelationMember::new(4, "inner role"),
        ];

        let mut original = RelationElement::default();
        original.nodes = members.clone();
        original.ways = members.clone();
        for i in 1..=4 {
            original.tags.insert(format!("key{i}"), format!("value{i}"));
        }

        let mut buffer = Vec::new();
        original.write_to(&mut buffer).unwrap();

        let mut restored = RelationElement::default();
        restored.nodes.push(RelationMember::new(30, "000unknown"));
        restored.nodes.push(RelationMember::new(40, "000inner role"));
        restored.ways.push(RelationMember::new(10, "000inner"));
        restored.ways.push(RelationMember::new(20, "000outer"));
        restored.tags.insert("key1old".into(), "value1old".into());
        restored.tags.insert("key2old".into(), "value2old".into());

        restored.read_from(&mut buffer.as_slice()).unwrap();

        assert_eq!(restored.nodes, members);
        assert_eq!(restored.ways, members);
        assert_eq!(restored.tags.len(), 4);
        assert_eq!(restored.tags["key1"], "value1");
        assert_eq!(restored.tags["key4"], "value4");
        assert!(!restored.tags.contains_key("key1old"));
    }
}
