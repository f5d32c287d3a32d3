use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Invalid packed movement mode: {0:#04x}")]
    InvalidMode(u8),

    #[error("No saved move for timestamp {0}")]
    UnknownTimestamp(f32),

    #[error("Base-relative correction names a base this world does not know")]
    UnresolvedBase,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Serialization(err.to_string())
    }
}
