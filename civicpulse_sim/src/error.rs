//! Errors raised while setting up a simulation run.

use civicpulse_core::CatalogError;
use civicpulse_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid scenario catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Event store error: {0}")]
    Store(#[from] EnvError),

    #[error("{0}")]
    Usage(String),
}

impl SimError {
    pub fn io(path: &str, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}
