pub mod cell_id;
pub mod covering;

pub use cell_id::{CellId, GEO_OBJECTS_DEPTH_LEVELS, REGIONS_DEPTH_LEVELS};
pub use covering::{cover_object, CellObjectIntersection, CellValuePair, CoveredGeometry};
