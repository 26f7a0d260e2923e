use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error(transparent)]
    Core(#[from] geopipe_core::CoreError),
    #[error(transparent)]
    Osm(#[from] geopipe_osm::OsmError),
    #[error(transparent)]
    Geocoder(#[from] geopipe_geocoder::GeocoderError),
    #[error("i/o failure on {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("stage failed: {0}")]
    Stage(String),
}

impl GeneratorError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> GeneratorError {
        let context = context.into();
        move |e| GeneratorError::Io(context, e)
    }
}
