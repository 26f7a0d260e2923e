pub mod feature_builder;
pub mod feature_file;
pub mod geo_object_id;
pub mod name_table;

pub use feature_builder::{FeatureBuilder, FeatureTypes, Geometry, RegionInfo};
pub use feature_file::{
    for_each_feature, for_each_feature_parallel, FeaturesCollector,
};
pub use geo_object_id::{GeoObjectId, GeoObjectKind};
pub use name_table::NameTable;
