//! Authentication session state.
//!
//! The backend speaks HTTP Basic auth. [`Session`] owns the complete
//! `Authorization` header value for the logged-in user, in memory only:
//! it is established by [`Session::login`] (which verifies the credentials
//! against the authenticated my-orders endpoint), cleared by
//! [`Session::logout`], and never persisted. Collaborators that need to
//! authenticate requests depend on the [`CredentialProvider`] seam rather
//! than on the session itself.

use std::sync::{Mutex, MutexGuard};

use base64::prelude::*;
use tracing::info;
use zeroize::Zeroizing;

use crate::{BookfeedError, Result};

/// Supplies an `Authorization` header value on demand.
///
/// The market core never stores passwords; it asks a provider whenever a
/// request needs authenticating.
pub trait CredentialProvider: Send + Sync {
    /// The header value for authenticated requests, or `None` when no
    /// user is logged in.
    fn authorization(&self) -> Option<String>;
}

/// Provider for unauthenticated use.
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn authorization(&self) -> Option<String> {
        None
    }
}

struct SessionData {
    username: String,
    authorization: Zeroizing<String>,
}

/// Process-wide authentication state with an explicit lifecycle:
/// created empty, populated by `login`, emptied by `logout`.
#[derive(Default)]
pub struct Session {
    inner: Mutex<Option<SessionData>>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies the credentials against the backend and, on success,
    /// stores the authorization header for subsequent requests.
    ///
    /// Verification probes the authenticated my-orders endpoint; any
    /// non-success status clears the session and surfaces as
    /// [`BookfeedError::Api`].
    ///
    /// # Errors
    ///
    /// Returns [`BookfeedError::Http`] if the request fails to complete,
    /// or [`BookfeedError::Api`] if the backend rejects the credentials.
    pub async fn login(&self, api_url: &str, username: &str, password: &str) -> Result<()> {
        let header = basic_header(username, password);

        let client = reqwest::Client::new();
        let response = client
            .get(format!("{api_url}/api/orders/my-orders"))
            .header(reqwest::header::AUTHORIZATION, header.as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            self.logout();
            return Err(BookfeedError::Api { status, body });
        }

        self.store(username, header);
        info!(username, "session established");
        Ok(())
    }

    /// Clears the session. Idempotent.
    pub fn logout(&self) {
        let cleared = self.data().take().is_some();
        if cleared {
            info!("session cleared");
        }
    }

    /// Whether a user is currently logged in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.data().is_some()
    }

    /// The logged-in username, if any.
    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.data().as_ref().map(|d| d.username.clone())
    }

    fn store(&self, username: &str, authorization: String) {
        *self.data() = Some(SessionData {
            username: username.to_string(),
            authorization: Zeroizing::new(authorization),
        });
    }

    fn data(&self) -> MutexGuard<'_, Option<SessionData>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialProvider for Session {
    fn authorization(&self) -> Option<String> {
        self.data().as_ref().map(|d| d.authorization.to_string())
    }
}

/// Builds the HTTP Basic `Authorization` header value.
fn basic_header(username: &str, password: &str) -> String {
    let token = BASE64_STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {token}")
}
