pub mod beam;
pub mod error;
pub mod geocoder;
pub mod hierarchy;
pub mod hierarchy_reader;
pub mod house_numbers;
pub mod index;
pub mod name_dictionary;
pub mod tokenize;
pub mod types;

pub use error::GeocoderError;
pub use geocoder::{Geocoder, SearchResult};
pub use hierarchy::Hierarchy;
pub use types::{Kind, Type, INDEX_FORMAT_VERSION};
