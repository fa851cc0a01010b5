//! Error taxonomy shared across the balancer
//!
//! Configuration and authentication errors are fatal for the run; every
//! other variant is handled at the cycle, cluster, or migration level
//! without stopping the outer loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Auth,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API request failed: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
