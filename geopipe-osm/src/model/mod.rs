pub mod element;
pub mod intermediate;
pub mod osm_error;

pub use element::{EntityKind, Member, OsmElement};
pub use intermediate::{NodeElement, RelationElement, RelationMember, WayElement};
pub use osm_error::OsmError;
