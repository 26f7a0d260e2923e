#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Way,
    Relation,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub reference: u64,
    pub kind: EntityKind,
    pub role: String,
}

/// One parsed OSM entity, exactly as delivered by a source reader.
/// Immutable once handed to a processor; `clear` exists so readers can
/// recycle one allocation across the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmElement {
    pub kind: EntityKind,
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    pub node_refs: Vec<u64>,
    pub members: Vec<Member>,
    pub tags: Vec<(String, String)>,
}

impl Default for OsmElement {
    fn default() -> Self {
        OsmElement {
            kind: EntityKind::Unknown,
            id: 0,
            lat: 0.0,
            lon: 0.0,
            node_refs: Vec::new(),
            members: Vec::new(),
            tags: Vec::new(),
        }
    }
}

impl OsmElement {
    pub fn clear(&mut self) {
        self.kind = EntityKind::Unknown;
        self.id = 0;
        self.lat = 0.0;
        self.lon = 0.0;
        self.node_refs.clear();
        self.members.clear();
        self.tags.clear();
    }

    pub fn is_node(&self) -> bool {
        self.kind == EntityKind::Node
    }

    pub fn is_way(&self) -> bool {
        self.kind == EntityKind::Way
    }

    pub fn is_relation(&self) -> bool {
        self.kind == EntityKind::Relation
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        // Keys are unique per element; the last occurrence wins, as in the
        // upstream planet dumps.
        if let Some(tag) = self.tags.iter_mut().find(|(k, _)| *k == key) {
            tag.1 = value.into();
        } else {
            self.tags.push((key, value.into()));
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tag(key).is_some()
    }

    pub fn has_tag_value(&self, key: &str, value: &str) -> bool {
        self.tag(key) == Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_tag_keys_collapse() {
        let mut e = OsmElement::default();
        e.add_tag("name", "old");
        e.add_tag("name", "new");
        assert_eq!(e.tags.len(), 1);
        assert_eq!(e.tag("name"), Some("new"));
    }
}
