use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("i/o failure on {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("malformed data: {0}")]
    BadFormat(String),
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
}

impl CoreError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> CoreError {
        let context = context.into();
        move |e| CoreError::Io(context, e)
    }
}
