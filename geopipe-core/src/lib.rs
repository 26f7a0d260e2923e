pub mod cell;
pub mod coding;
pub mod error;
pub mod index;
pub mod kv;
pub mod mercator;
pub mod readahead;

pub use error::CoreError;
