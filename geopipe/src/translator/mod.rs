pub mod classify;
pub mod geometry_assembler;
pub mod features_stage;
pub mod preprocess;

pub use features_stage::{generate_features, FeatureTargets};
pub use preprocess::generate_intermediate_data;
