//! OAuth2 credential lifecycle library
//!
//! Provides the authorization-code exchange, credential file storage, and
//! demand-driven token refresh for the drive gateway. This crate is a
//! standalone library with no dependency on the gateway binary — it can be
//! tested and used independently.
//!
//! Credential flow:
//! 1. Gateway redirects the browser to the provider's consent page
//! 2. Provider calls back with an authorization code
//! 3. Gateway calls `ProviderClient::exchange_code()` via
//!    `TokenManager::complete_authorization()`
//! 4. Credential persisted via `CredentialStore::write()`
//! 5. Later requests call `TokenManager::get_valid_access_token()`, which
//!    refreshes through `ProviderClient::refresh()` only when the stored
//!    token has expired — one refresh at a time, concurrent callers share
//!    the result
//!
//! There is no background refresh task: refresh is strictly demand-driven.

pub mod credential;
pub mod error;
pub mod manager;
pub mod provider;
pub mod store;

pub use credential::{Credential, unix_now};
pub use error::{Error, Result};
pub use manager::TokenManager;
pub use provider::{ProviderClient, ProviderConfig, RefreshResponse, TokenResponse, UserProfile};
pub use store::CredentialStore;
