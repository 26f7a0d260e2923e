pub mod builder;
pub mod info_getter;
pub mod kv;
pub mod place;
pub mod region;
pub mod specifier;
pub mod tree;

pub use builder::RegionsBuilder;
pub use info_getter::RegionInfoGetter;
pub use place::{AdminLevel, PlaceLevel, PlaceType};
pub use region::{PlacePoint, Region};
pub use tree::{Forest, LevelRegion, NodeId};

use crate::GeneratorError;
use std::path::Path;

/// The regions KV stage: loads classified region features, builds the
/// per-country forests and serializes one KV line per placed region.
pub fn generate_regions(
    regions_features: &Path,
    regions_kv: &Path,
    threads_count: usize,
) -> Result<(), GeneratorError> {
    let (regions, place_points) = builder::load_regions(regions_features)?;
    log::info!(
        "loaded {} region polygons and {} place points",
        regions.len(),
        place_points.len()
    );

    let builder = RegionsBuilder::new(regions, place_points, threads_count);
    kv::save_regions_kv(builder, regions_kv)
}
