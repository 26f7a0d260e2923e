pub mod element_cache;
pub mod index_file;
pub mod intermediate_data;
pub mod point_storage;

pub use intermediate_data::{
    IntermediateDataReader, IntermediateDataWriter, IntermediateFiles,
};
pub use point_storage::{
    create_point_storage_reader, create_point_storage_writer, NodeStorageType,
    PointStorageReader, PointStorageWriter,
};
