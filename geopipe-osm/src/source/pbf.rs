use crate::model::{EntityKind, Member, OsmElement};
use crate::OsmError;
use osmpbf::{Element, ElementReader};
use std::path::Path;

/// Streams a .pbf dump through `osmpbf`, converting to the shared element
/// model. Dense nodes are expanded; if you match `Node`, you also want
/// `DenseNode`.
pub fn for_each<F>(path: &Path, mut processor: F) -> Result<(), OsmError>
where
    F: FnMut(OsmElement),
{
    let reader = ElementReader::from_path(path)?;
    reader.for_each(|element| {
        match element {
            Element::Node(node) => {
                let mut out = OsmElement {
                    kind: EntityKind::Node,
                    id: node.id() as u64,
                    lat: node.lat(),
                    lon: node.lon(),
                    ..OsmElement::default()
                };
                for (key, value) in node.tags() {
                    out.add_tag(key, value);
                }
                processor(out);
            }
            Element::DenseNode(node) => {
                let mut out = OsmElement {
                    kind: EntityKind::Node,
                    id: node.id() as u64,
                    lat: node.lat(),
                    lon: node.lon(),
                    ..OsmElement::default()
                };
                for (key, value) in node.tags() {
                    out.add_tag(key, value);
                }
                processor(out);
            }
            Element::Way(way) => {
                let mut out = OsmElement {
                    kind: EntityKind::Way,
                    id: way.id() as u64,
                    ..OsmElement::default()
                };
                out.node_refs = way.refs().map(|r| r as u64).collect();
                for (key, value) in way.tags() {
                    out.add_tag(key, value);
                }
                processor(out);
            }
            Element::Relation(relation) => {
                let mut out = OsmElement {
                    kind: EntityKind::Relation,
                    id: relation.id() as u64,
                    ..OsmElement::default()
                };
                for member in relation.members() {
                    let kind = match member.member_type {
                        osmpbf::RelMemberType::Node => EntityKind::Node,
                        osmpbf::RelMemberType::Way => EntityKind::Way,
                        osmpbf::RelMemberType::Relation => EntityKind::Relation,
                    };
                    out.members.push(Member {
                        reference: member.member_id as u64,
                        kind,
                        role: member.role().unwrap_or_default().to_string(),
                    });
                }
                for (key, value) in relation.tags() {
                    out.add_tag(key, value);
                }
                processor(out);
            }
        }
    })?;
    Ok(())
}
