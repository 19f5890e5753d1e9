//! Credential lifecycle manager
//!
//! Owns the expiry decision and refresh orchestration on top of the store
//! and provider client. A request needing a token goes through
//! `get_valid_access_token()`:
//!
//! - no stored record → `None`, the caller redirects to authorization
//! - record still valid → the stored token, zero network calls (fast path)
//! - record expired → refresh under a single-flight guard, persist, return
//!
//! The guard admits one refresh at a time. Callers that observe an expired
//! record while a refresh is in flight wait on the guard, re-check the
//! store, and reuse the winner's result instead of issuing a second
//! provider call. A rejected refresh (revoked token) leaves the stored
//! record untouched; the user must redo the full authorization flow.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::{Credential, unix_now};
use crate::error::Result;
use crate::provider::ProviderClient;
use crate::store::CredentialStore;

/// Lifecycle manager for the single credential record.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    provider: ProviderClient,
    /// Single-flight guard for the check-refresh-persist sequence.
    refresh_guard: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: Arc<CredentialStore>, provider: ProviderClient) -> Self {
        Self {
            store,
            provider,
            refresh_guard: Mutex::new(()),
        }
    }

    /// Return a currently-valid access token, refreshing if necessary.
    ///
    /// `Ok(None)` means unauthenticated — no record exists and the caller
    /// must begin the authorization flow. Errors carry the refresh failure
    /// reason (provider rejection vs transport) without retrying.
    pub async fn get_valid_access_token(&self) -> Result<Option<String>> {
        let Some(credential) = self.store.read().await else {
            return Ok(None);
        };

        let now = unix_now();
        if credential.is_valid_at(now) {
            debug!(
                remaining_secs = credential.expires_at() - now,
                "access token still valid"
            );
            return Ok(Some(credential.access_token));
        }

        // Expired. Only one caller refreshes; the rest wait here and pick
        // up the refreshed record on the re-check below.
        let _refresh = self.refresh_guard.lock().await;

        let Some(credential) = self.store.read().await else {
            return Ok(None);
        };
        let now = unix_now();
        if credential.is_valid_at(now) {
            debug!("token was refreshed by a concurrent caller");
            return Ok(Some(credential.access_token));
        }

        info!(expired_at = credential.expires_at(), "access token expired, refreshing");
        let refreshed = match self.provider.refresh(&credential.refresh_token).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                let outcome = if e.is_rejection() { "rejected" } else { "transport" };
                metrics::counter!("gateway_token_refresh_total", "outcome" => outcome)
                    .increment(1);
                return Err(e);
            }
        };

        // Not complete until durably stored: a crash before this write
        // leaves the old expired record, which simply refreshes again.
        let renewed =
            credential.after_refresh(refreshed.access_token, refreshed.expires_in, unix_now());
        self.store.write(renewed.clone()).await?;

        info!(expires_in = renewed.expires_in, "refreshed access token persisted");
        metrics::counter!("gateway_token_refresh_total", "outcome" => "success").increment(1);
        Ok(Some(renewed.access_token))
    }

    /// Complete the authorization-code flow: exchange the code and persist
    /// the resulting record anchored at the current time.
    ///
    /// On provider rejection the error payload is returned unmodified and
    /// nothing is persisted.
    pub async fn complete_authorization(&self, code: &str) -> Result<Credential> {
        let tokens = self.provider.exchange_code(code).await?;

        let credential = Credential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            saved_time: unix_now(),
        };
        self.store.write(credential.clone()).await?;

        info!(expires_in = credential.expires_in, "authorization complete, credential persisted");
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::provider::ProviderConfig;
    use axum::Form;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Mock token endpoint. Counts refresh calls so tests can assert the
    /// single-flight property. Refresh tokens other than "rt_good" are
    /// rejected with invalid_grant; exchange accepts only "good-code".
    async fn start_provider(refresh_calls: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let refresh_calls = refresh_calls.clone();
                async move {
                    match form.get("grant_type").map(String::as_str) {
                        Some("refresh_token") => {
                            refresh_calls.fetch_add(1, Ordering::SeqCst);
                            if form.get("refresh_token").map(String::as_str) == Some("rt_good") {
                                (
                                    StatusCode::OK,
                                    axum::Json(serde_json::json!({
                                        "access_token": "NEW",
                                        "expires_in": 3600,
                                    })),
                                )
                            } else {
                                (
                                    StatusCode::BAD_REQUEST,
                                    axum::Json(serde_json::json!({
                                        "error": "invalid_grant",
                                        "error_description": "Token has been expired or revoked.",
                                    })),
                                )
                            }
                        }
                        Some("authorization_code") => {
                            if form.get("code").map(String::as_str) == Some("good-code") {
                                (
                                    StatusCode::OK,
                                    axum::Json(serde_json::json!({
                                        "access_token": "at_initial",
                                        "refresh_token": "rt_good",
                                        "expires_in": 3599,
                                    })),
                                )
                            } else {
                                (
                                    StatusCode::BAD_REQUEST,
                                    axum::Json(serde_json::json!({
                                        "error": "invalid_grant",
                                        "error_description": "Malformed auth code.",
                                    })),
                                )
                            }
                        }
                        _ => (
                            StatusCode::BAD_REQUEST,
                            axum::Json(serde_json::json!({"error": "unsupported_grant_type"})),
                        ),
                    }
                }
            }),
        );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }

    fn provider(base: &str) -> ProviderClient {
        ProviderClient::new(
            reqwest::Client::new(),
            ProviderConfig {
                token_url: format!("{base}/token"),
                userinfo_url: format!("{base}/userinfo"),
                client_id: "client-123".into(),
                client_secret: "secret-456".into(),
                redirect_uri: "http://localhost:8000/auth/callback".into(),
            },
        )
    }

    fn stored(refresh_token: &str, saved_time: u64, expires_in: u64) -> Credential {
        Credential {
            access_token: "at_stored".into(),
            refresh_token: refresh_token.into(),
            expires_in,
            saved_time,
        }
    }

    async fn manager_with(
        dir: &tempfile::TempDir,
        base: &str,
        credential: Option<Credential>,
    ) -> (Arc<TokenManager>, Arc<CredentialStore>) {
        let path = dir.path().join("credentials.json");
        let store = Arc::new(CredentialStore::load(path).await);
        if let Some(c) = credential {
            store.write(c).await.unwrap();
        }
        let manager = Arc::new(TokenManager::new(store.clone(), provider(base)));
        (manager, store)
    }

    #[tokio::test]
    async fn no_stored_record_returns_none() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = start_provider(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir, &base, None).await;

        assert_eq!(manager.get_valid_access_token().await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_record_returns_stored_token_without_network() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = start_provider(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) =
            manager_with(&dir, &base, Some(stored("rt_good", unix_now(), 3600))).await;

        let token = manager.get_valid_access_token().await.unwrap();
        assert_eq!(token.as_deref(), Some("at_stored"));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "fast path must not refresh");
    }

    #[tokio::test]
    async fn expired_record_is_refreshed_and_persisted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = start_provider(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let before = unix_now();
        let (manager, store) =
            manager_with(&dir, &base, Some(stored("rt_good", before - 7200, 3600))).await;

        let token = manager.get_valid_access_token().await.unwrap();
        assert_eq!(token.as_deref(), Some("NEW"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let renewed = store.read().await.unwrap();
        assert_eq!(renewed.access_token, "NEW");
        assert_eq!(renewed.refresh_token, "rt_good", "refresh token must carry over");
        assert_eq!(renewed.expires_in, 3600);
        assert!(renewed.saved_time >= before, "anchor must be re-set to now");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_a_single_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = start_provider(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) =
            manager_with(&dir, &base, Some(stored("rt_good", unix_now() - 7200, 3600))).await;

        let mut handles = vec![];
        for _ in 0..10 {
            let manager = manager.clone();
            handles.push(tokio::spawn(
                async move { manager.get_valid_access_token().await },
            ));
        }

        for h in handles {
            let token = h.await.unwrap().unwrap();
            assert_eq!(token.as_deref(), Some("NEW"));
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "a concurrent batch must trigger exactly one provider refresh"
        );
    }

    #[tokio::test]
    async fn rejected_refresh_surfaces_and_leaves_the_record_untouched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = start_provider(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let original = stored("rt_revoked", unix_now() - 7200, 3600);
        let (manager, store) = manager_with(&dir, &base, Some(original.clone())).await;

        let err = manager.get_valid_access_token().await.unwrap_err();
        assert!(err.is_rejection(), "got {err:?}");

        // In memory and on disk, the expired record survives the rejection
        assert_eq!(store.read().await.unwrap(), original);
        let on_disk: Credential = serde_json::from_str(
            &tokio::fs::read_to_string(dir.path().join("credentials.json"))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk, original);
    }

    #[tokio::test]
    async fn transport_failure_releases_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(
            &dir,
            "http://127.0.0.1:1",
            Some(stored("rt_good", unix_now() - 7200, 3600)),
        )
        .await;

        let err = manager.get_valid_access_token().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {err:?}");

        // A second attempt must reach the provider again, not deadlock
        let second = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            manager.get_valid_access_token(),
        )
        .await
        .expect("guard was not released");
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn complete_authorization_persists_the_record() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = start_provider(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir, &base, None).await;

        let before = unix_now();
        let credential = manager.complete_authorization("good-code").await.unwrap();
        assert_eq!(credential.access_token, "at_initial");
        assert_eq!(credential.refresh_token, "rt_good");
        assert!(credential.saved_time >= before);

        assert_eq!(store.read().await.unwrap(), credential);
    }

    #[tokio::test]
    async fn bad_code_persists_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = start_provider(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir, &base, None).await;

        let err = manager.complete_authorization("bad-code").await.unwrap_err();
        match err {
            Error::Provider { error, .. } => assert_eq!(error, "invalid_grant"),
            other => panic!("expected Provider error, got {other:?}"),
        }
        assert!(store.read().await.is_none(), "no record may be persisted");
        assert!(
            !dir.path().join("credentials.json").exists(),
            "no file may be written"
        );
    }
}
