//! Drive upload handler
//!
//! The consumer of the credential lifecycle: obtains a valid access token
//! (refreshing if needed) and performs a multipart upload to the configured
//! resource API. Upload failures are reported with the downstream status
//! and payload — they say nothing about credential validity.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info};

use drive_auth::Error as AuthError;

use crate::AppState;

/// Upload request body. Both fields default, matching a quick smoke-test
/// upload with an empty `{}` body.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default = "default_content")]
    pub content: String,
    #[serde(default = "default_filename")]
    pub filename: String,
}

fn default_content() -> String {
    "Hello from the drive gateway!".into()
}

fn default_filename() -> String {
    "example.txt".into()
}

/// POST /drive/upload — upload a text file on behalf of the authenticated
/// user, refreshing the access token transparently when expired.
pub async fn upload(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<UploadRequest>,
) -> Response {
    let token = match state.manager.get_valid_access_token().await {
        Ok(Some(token)) => token,
        Ok(None) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": "please login first via /auth/login"}),
            );
        }
        Err(AuthError::Provider { error, description }) => {
            // The refresh token itself was rejected — a full re-authorization
            // is the only way back to a working credential.
            return error_response(
                StatusCode::UNAUTHORIZED,
                serde_json::json!({
                    "error": "authorization expired, please login again via /auth/login",
                    "provider_error": error,
                    "error_description": description,
                }),
            );
        }
        Err(AuthError::Transport(msg)) => {
            return error_response(
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": "identity provider unreachable",
                    "details": msg,
                }),
            );
        }
        Err(AuthError::Storage(msg)) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "credential storage failure",
                    "details": msg,
                }),
            );
        }
    };

    let filename = body.filename.clone();
    let form = match upload_form(&filename, body.content) {
        Ok(form) => form,
        Err(e) => {
            error!(error = %e, "failed to build multipart form");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"success": false, "error": "failed to build upload request"}),
            );
        }
    };

    let response = match state
        .http
        .post(&state.config.provider.upload_url)
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "upload request failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                serde_json::json!({"success": false, "error": format!("upload request failed: {e}")}),
            );
        }
    };

    let status = response.status();
    let payload: serde_json::Value = response
        .json()
        .await
        .unwrap_or_else(|_| serde_json::json!({"error": "unreadable upstream response"}));

    if status.is_success() {
        info!(file_name = %filename, "file uploaded");
        axum::Json(serde_json::json!({
            "success": true,
            "file_id": payload["id"],
            "file_name": payload["name"],
            "message": "File uploaded successfully",
        }))
        .into_response()
    } else {
        (
            status,
            axum::Json(serde_json::json!({
                "success": false,
                "error": payload,
            })),
        )
            .into_response()
    }
}

/// Multipart body for the resource API: a JSON metadata part plus the file
/// content itself.
fn upload_form(
    filename: &str,
    content: String,
) -> Result<reqwest::multipart::Form, reqwest::Error> {
    let metadata = serde_json::json!({"name": filename}).to_string();

    let metadata_part = reqwest::multipart::Part::text(metadata)
        .file_name("metadata.json")
        .mime_str("application/json")?;
    let file_part = reqwest::multipart::Part::bytes(content.into_bytes())
        .file_name(filename.to_owned())
        .mime_str("text/plain")?;

    Ok(reqwest::multipart::Form::new()
        .part("metadata", metadata_part)
        .part("file", file_part))
}

fn error_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, axum::Json(body)).into_response()
}
