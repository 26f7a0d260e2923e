use thiserror::Error;

#[derive(Error, Debug)]
pub enum OsmError {
    #[error("invalid source configuration: {0}")]
    Configuration(String),
    #[error("failure reading OSM source {path}: {message}")]
    SourceRead { path: String, message: String },
    #[error("failure reading .pbf file: {source}")]
    PbfLib {
        #[from]
        source: osmpbf::Error,
    },
    #[error("malformed {format} data at byte {offset}: {message}")]
    MalformedSource {
        format: &'static str,
        offset: u64,
        message: String,
    },
    #[error("intermediate store failure: {0}")]
    Store(#[from] geopipe_core::CoreError),
    #[error("i/o failure on {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("node {0} exceeds the raw-mem storage capacity")]
    NodeIdOutOfRange(u64),
}

impl OsmError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> OsmError {
        let context = context.into();
        move |e| OsmError::Io(context, e)
    }
}
