//! Movement error types

use std::path::PathBuf;

/// Errors surfaced by character movement operations
#[derive(Debug, thiserror::Error)]
pub enum MovementError {
    #[error("the resized capsule would overlap blocking geometry")]
    Encroached,

    #[error("crouching is not allowed in the current movement mode")]
    CannotCrouch,

    #[error("failed to read movement config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse movement config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
