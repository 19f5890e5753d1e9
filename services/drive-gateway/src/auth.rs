//! Authorization flow handlers
//!
//! `GET /auth/login` sends the browser to the provider's consent page;
//! `GET /auth/callback` completes the code-for-token exchange and persists
//! the credential. The profile fetch on callback is informational — its
//! failure never fails the authorization.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{info, warn};

use drive_auth::Error as AuthError;

use crate::AppState;
use crate::config::ProviderSettings;

/// Build the provider consent URL.
///
/// `access_type=offline` + `prompt=consent` force the provider to issue a
/// refresh token on every login, not just the first.
pub fn consent_url(provider: &ProviderSettings) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        provider.auth_url,
        urlencoded(&provider.client_id),
        urlencoded(&provider.redirect_uri),
        urlencoded(&provider.scope),
    )
}

/// Minimal URL encoding for query parameter values.
/// Covers the characters that appear in OAuth client ids, redirect URIs,
/// and scope lists.
fn urlencoded(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace(':', "%3A")
        .replace('/', "%2F")
        .replace('?', "%3F")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('+', "%2B")
}

/// GET /auth/login — redirect to the provider's consent page.
pub async fn login(State(state): State<AppState>) -> Redirect {
    let url = consent_url(&state.config.provider);
    info!("redirecting to provider consent page");
    Redirect::temporary(&url)
}

/// GET /auth/callback — exchange the authorization code and persist the
/// credential pair.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(code) = params.get("code") else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({"error": "no authorization code"})),
        )
            .into_response();
    };

    let credential = match state.manager.complete_authorization(code).await {
        Ok(credential) => credential,
        Err(AuthError::Provider { error, description }) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(serde_json::json!({
                    "error": error,
                    "error_description": description,
                })),
            )
                .into_response();
        }
        Err(AuthError::Transport(msg)) => {
            return (
                StatusCode::BAD_GATEWAY,
                axum::Json(serde_json::json!({
                    "error": "identity provider unreachable",
                    "details": msg,
                })),
            )
                .into_response();
        }
        Err(AuthError::Storage(msg)) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({
                    "error": "failed to persist credential",
                    "details": msg,
                })),
            )
                .into_response();
        }
    };

    // Informational only. The tokens are already persisted; a userinfo
    // failure must not turn a successful login into an error.
    let name = match state.provider.fetch_profile(&credential.access_token).await {
        Ok(profile) => profile.name.unwrap_or_else(|| "User".into()),
        Err(e) => {
            warn!(error = %e, "profile fetch failed, continuing without it");
            "User".into()
        }
    };

    (
        StatusCode::OK,
        format!("Login successful!\nWelcome {name}!\nCredential saved."),
    )
        .into_response()
}
