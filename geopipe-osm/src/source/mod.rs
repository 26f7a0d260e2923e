pub mod o5m;
pub mod pbf;
pub mod xml;

use crate::model::OsmElement;
use crate::OsmError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsmSourceType {
    Xml,
    O5m,
    Pbf,
}

impl std::str::FromStr for OsmSourceType {
    type Err = OsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xml" => Ok(OsmSourceType::Xml),
            "o5m" => Ok(OsmSourceType::O5m),
            "pbf" => Ok(OsmSourceType::Pbf),
            other => Err(OsmError::Configuration(format!(
                "unknown osm file type '{other}', expected xml, o5m or pbf"
            ))),
        }
    }
}

/// An OSM dump on disk plus the reader that understands its encoding.
/// Byte-level parsing stays inside this module; the rest of the pipeline
/// only ever sees the element stream.
pub struct OsmSource {
    path: PathBuf,
    source_type: OsmSourceType,
}

impl OsmSource {
    pub fn new(path: impl Into<PathBuf>, source_type: OsmSourceType) -> OsmSource {
        OsmSource {
            path: path.into(),
            source_type,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_type(&self) -> OsmSourceType {
        self.source_type
    }

    /// Streams every element through `processor` on the calling thread.
    pub fn for_each<F>(&self, processor: F) -> Result<(), OsmError>
    where
        F: FnMut(OsmElement),
    {
        match self.source_type {
            OsmSourceType::Xml => xml::for_each(&self.path, processor),
            OsmSourceType::O5m => o5m::for_each(&self.path, processor),
            OsmSourceType::Pbf => pbf::for_each(&self.path, processor),
        }
    }
}
