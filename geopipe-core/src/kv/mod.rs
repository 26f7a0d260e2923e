pub mod concurrent_writer;
pub mod key_value_storage;

pub use concurrent_writer::KeyValueConcurrentWriter;
pub use key_value_storage::{serialize_id, KeyValue, KeyValueStorage};
