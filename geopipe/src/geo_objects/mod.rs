pub mod generator;
pub mod maintainer;

pub use generator::generate_geo_objects;
pub use maintainer::{GeoObjectData, GeoObjectMaintainer};
