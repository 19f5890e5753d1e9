//! Identity provider HTTP client
//!
//! Stateless calls against the provider's token and userinfo endpoints:
//! 1. Authorization code exchange (initial flow completion)
//! 2. Token refresh (`grant_type=refresh_token`)
//! 3. Best-effort profile fetch (informational only)
//!
//! Every call is a single round-trip — no internal retries. The shared
//! reqwest client carries a bounded timeout, so a stalled provider surfaces
//! as `Error::Transport` instead of hanging the caller. Endpoints and client
//! credentials are injected at construction; tests point them at local mock
//! servers.

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Provider endpoints and client identity, taken from gateway configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub token_url: String,
    pub userinfo_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Response to the authorization-code exchange.
///
/// `expires_in` is a delta in seconds from the response time; the lifecycle
/// manager anchors it to a locally observed timestamp when storing.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Response to a refresh call. The provider does not reissue the refresh
/// token in this flow — callers retain the original. If a provider includes
/// one anyway, it is ignored by deserialization.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// Userinfo payload. All fields optional — the profile is informational.
#[derive(Debug, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// OAuth error body per RFC 6749 §5.2.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Stateless client for the provider's token and userinfo endpoints.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(http: reqwest::Client, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    /// Exchange an authorization code for the initial token pair.
    ///
    /// Provider-reported rejections (malformed or expired code, mismatched
    /// redirect URI) come back as `Error::Provider` with the OAuth error
    /// payload intact.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("code exchange request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(rejection(response, "code exchange").await);
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| invalid_body("code exchange", e))
    }

    /// Obtain a new access token from the stored refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(rejection(response, "token refresh").await);
        }

        response
            .json::<RefreshResponse>()
            .await
            .map_err(|e| invalid_body("token refresh", e))
    }

    /// Fetch the user's profile with a Bearer token.
    ///
    /// Callers treat failure as non-fatal: an authorization that completed
    /// its code exchange succeeds whether or not this call does.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("userinfo request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(rejection(response, "userinfo").await);
        }

        let profile = response
            .json::<UserProfile>()
            .await
            .map_err(|e| invalid_body("userinfo", e))?;
        debug!(has_name = profile.name.is_some(), "fetched user profile");
        Ok(profile)
    }
}

/// Map a non-success provider response to `Error::Provider`, keeping the
/// OAuth error payload when the body parses as one.
async fn rejection(response: reqwest::Response, context: &str) -> Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));

    match serde_json::from_str::<OAuthErrorBody>(&body) {
        Ok(parsed) => Error::Provider {
            error: parsed.error,
            description: parsed.error_description,
        },
        Err(_) => Error::Provider {
            error: format!("{context} returned {status}"),
            description: Some(body),
        },
    }
}

fn invalid_body(context: &str, e: reqwest::Error) -> Error {
    Error::Provider {
        error: "invalid_response".into(),
        description: Some(format!("{context}: {e}")),
    }
}
