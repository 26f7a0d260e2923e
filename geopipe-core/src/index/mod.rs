pub mod interval_index;
pub mod interval_index_builder;

pub use interval_index::IntervalIndex;
pub use interval_index_builder::{
    build_interval_index, IntervalIndexBuilder, IntervalIndexVersion,
};
