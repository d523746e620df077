//! Identity boundary
//!
//! The data layer only needs to know whether someone is signed in and who.
//! Sign-in flows live with the external identity provider.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use log::info;

use crate::error::{RemoteError, RemoteResult};

/// Source of the current user
pub trait IdentityProvider: Send + Sync {
    /// Signed-in user id, if the session is valid
    fn current_user(&self) -> Option<String>;

    /// Bearer token for backend requests
    fn access_token(&self) -> Option<String> {
        None
    }

    /// Signed-in user id or `Unauthenticated`
    fn require_user(&self) -> RemoteResult<String> {
        self.current_user().ok_or(RemoteError::Unauthenticated)
    }
}

/// Session data handed over by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    /// User id
    pub user_id: String,

    /// Access token
    pub access_token: String,

    /// Expiry, if the provider reports one
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionData {
    /// Whether the session is still usable
    pub fn is_valid(&self) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > Utc::now())
    }
}

/// Mutable session updated on sign-in and sign-out
#[derive(Debug, Default)]
pub struct Session {
    data: RwLock<Option<SessionData>>,
}

impl Session {
    /// Signed-out session
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new session
    pub fn sign_in(&self, data: SessionData) {
        info!("Session started for user {}", data.user_id);
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = Some(data);
    }

    /// Forget the session
    pub fn sign_out(&self) {
        if let Some(data) = self.data.write().unwrap_or_else(PoisonError::into_inner).take() {
            info!("Session ended for user {}", data.user_id);
        }
    }

    fn valid(&self) -> Option<SessionData> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|data| data.is_valid())
            .cloned()
    }
}

impl IdentityProvider for Session {
    fn current_user(&self) -> Option<String> {
        self.valid().map(|data| data.user_id)
    }

    fn access_token(&self) -> Option<String> {
        self.valid().map(|data| data.access_token)
    }
}

/// Identity that never changes, for services and tests
#[derive(Debug, Clone, Default)]
pub struct FixedIdentity {
    user_id: Option<String>,
}

impl FixedIdentity {
    /// Always signed in as `user_id`
    pub fn user(user_id: impl Into<String>) -> Self {
        FixedIdentity {
            user_id: Some(user_id.into()),
        }
    }

    /// Never signed in
    pub fn anonymous() -> Self {
        FixedIdentity { user_id: None }
    }
}

impl IdentityProvider for FixedIdentity {
    fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn data(expires_at: Option<DateTime<Utc>>) -> SessionData {
        SessionData {
            user_id: "u-1".to_string(),
            access_token: "token".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let session = Session::new();
        assert!(matches!(session.require_user(), Err(RemoteError::Unauthenticated)));

        session.sign_in(data(None));
        assert_eq!(session.current_user().as_deref(), Some("u-1"));
        assert_eq!(session.access_token().as_deref(), Some("token"));

        session.sign_out();
        assert!(session.current_user().is_none());
    }

    #[test]
    fn test_expired_session_is_signed_out() {
        let session = Session::new();
        session.sign_in(data(Some(Utc::now() - Duration::minutes(1))));
        assert!(session.current_user().is_none());
        assert!(session.access_token().is_none());
    }

    #[test]
    fn test_fixed_identity() {
        assert_eq!(FixedIdentity::user("u-2").require_user().unwrap(), "u-2");
        assert!(FixedIdentity::anonymous().current_user().is_none());
    }
}
