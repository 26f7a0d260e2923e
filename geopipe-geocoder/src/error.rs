use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeocoderError {
    #[error("failed to open {0}: {1}")]
    Open(String, #[source] std::io::Error),
    #[error("no version info in data")]
    NoVersion,
    #[error("token index version mismatch: expected {expected}, got {actual}")]
    IndexVersionMismatch { expected: u32, actual: u32 },
    #[error("failed to load hierarchy: {0}")]
    Load(String),
    #[error(transparent)]
    Core(#[from] geopipe_core::CoreError),
}
