pub mod cache;
pub mod model;
pub mod source;

pub use model::osm_error::OsmError;
