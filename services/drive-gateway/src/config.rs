//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client secret is loaded from the GOOGLE_CLIENT_SECRET env var
//! or client_secret_file, never stored in the TOML directly to avoid
//! leaking secrets. Missing identity settings (client id, secret, redirect
//! URI, scope) are fatal at startup — never a per-request error.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderSettings,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
}

/// HTTP server settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Timeout applied to every outbound provider/upload call
    pub timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            timeout_secs: 30,
            max_connections: 1000,
        }
    }
}

/// Identity provider endpoints and client identity.
///
/// Endpoint URLs default to Google's. `client_id` can live in the TOML (it
/// is not a secret) or come from GOOGLE_CLIENT_ID; the secret only ever
/// comes from the environment or a secret file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub upload_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
            upload_url: "https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart"
                .into(),
            client_id: String::new(),
            redirect_uri: String::new(),
            scope: String::new(),
            client_secret_file: None,
            client_secret: None,
        }
    }
}

/// Credential persistence settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub credential_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credential_file: PathBuf::from("credentials.json"),
        }
    }
}

/// Fixed-window rate limiter settings (requests per client IP per window)
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables and validate.
    ///
    /// Client identity resolution:
    /// - client_id: GOOGLE_CLIENT_ID env var, else the TOML value
    /// - client_secret: GOOGLE_CLIENT_SECRET env var, else client_secret_file
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Self::finish(config)
    }

    /// Env overlay + validation, split out so tests can start from a
    /// programmatic Config as well.
    pub fn finish(mut config: Config) -> common::Result<Self> {
        if let Ok(id) = std::env::var("GOOGLE_CLIENT_ID") {
            config.provider.client_id = id;
        }

        if let Ok(secret) = std::env::var("GOOGLE_CLIENT_SECRET") {
            config.provider.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.provider.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.provider.client_secret = Some(Secret::new(secret));
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let p = &self.provider;
        for (field, value) in [
            ("client_id", &p.client_id),
            ("redirect_uri", &p.redirect_uri),
            ("scope", &p.scope),
        ] {
            if value.is_empty() {
                return Err(common::Error::Config(format!("{field} is required")));
            }
        }
        if p.client_secret.is_none() {
            return Err(common::Error::Config(
                "client secret is required (GOOGLE_CLIENT_SECRET or client_secret_file)".into(),
            ));
        }
        for (field, url) in [
            ("auth_url", &p.auth_url),
            ("token_url", &p.token_url),
            ("userinfo_url", &p.userinfo_url),
            ("upload_url", &p.upload_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{field} must start with http:// or https://, got: {url}"
                )));
            }
        }
        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(common::Error::Config(
                "rate_limit.max_requests must be greater than 0".into(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(common::Error::Config(
                "rate_limit.window_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Build the provider client settings, exposing the secret once.
    pub fn provider_config(&self) -> drive_auth::ProviderConfig {
        drive_auth::ProviderConfig {
            token_url: self.provider.token_url.clone(),
            userinfo_url: self.provider.userinfo_url.clone(),
            client_id: self.provider.client_id.clone(),
            client_secret: self
                .provider
                .client_secret
                .as_ref()
                .map(|s| s.expose().clone())
                .unwrap_or_default(),
            redirect_uri: self.provider.redirect_uri.clone(),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("drive-gateway.toml")
    }
}
