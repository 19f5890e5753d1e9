//! Startup error types
//!
//! Covers the only fatal error class in the gateway: configuration that is
//! missing or invalid at boot. Everything credential-related maps to a
//! bounded HTTP response instead.

use thiserror::Error;

/// Startup error
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using the startup Error
pub type Result<T> = std::result::Result<T, Error>;
