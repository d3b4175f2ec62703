//! Socket admission by registered user token.
//!
//! When an admin token is configured, incoming sockets must present a
//! `userToken` query parameter previously registered through the external
//! admin surface. Without an admin token every socket is admitted.

use std::collections::HashSet;

use tokio::sync::RwLock;
use tracing::debug;

/// Registered user tokens plus the admin credential that guards them
pub struct TokenStore {
    admin_token: Option<String>,
    user_tokens: RwLock<HashSet<String>>,
}

impl TokenStore {
    pub fn new(admin_token: Option<String>) -> Self {
        Self {
            admin_token,
            user_tokens: RwLock::new(HashSet::new()),
        }
    }

    /// Whether sockets must present a registered token at all
    pub fn admission_required(&self) -> bool {
        self.admin_token.is_some()
    }

    /// Admission predicate applied to every upgrade request
    pub async fn is_admitted(&self, token: Option<&str>) -> bool {
        if self.admin_token.is_none() {
            return true;
        }
        match token {
            Some(token) => self.user_tokens.read().await.contains(token),
            None => false,
        }
    }

    /// Check a presented admin credential
    pub fn check_admin(&self, token: &str) -> bool {
        self.admin_token.as_deref() == Some(token)
    }

    /// Register a user token for later admission
    pub async fn register(&self, token: impl Into<String>) {
        let token = token.into();
        debug!("user token registered");
        self.user_tokens.write().await.insert(token);
    }

    /// Revoke a user token. Returns whether it was registered.
    pub async fn revoke(&self, token: &str) -> bool {
        self.user_tokens.write().await.remove(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_admission_without_admin_token() {
        let store = TokenStore::new(None);
        assert!(!store.admission_required());
        assert!(store.is_admitted(None).await);
        assert!(store.is_admitted(Some("anything")).await);
    }

    #[tokio::test]
    async fn test_admission_requires_registered_token() {
        let store = TokenStore::new(Some("admin".to_string()));
        assert!(store.admission_required());
        assert!(!store.is_admitted(None).await);
        assert!(!store.is_admitted(Some("unknown")).await);

        store.register("user-1").await;
        assert!(store.is_admitted(Some("user-1")).await);

        assert!(store.revoke("user-1").await);
        assert!(!store.is_admitted(Some("user-1")).await);
        assert!(!store.revoke("user-1").await);
    }

    #[test]
    fn test_check_admin() {
        let store = TokenStore::new(Some("admin".to_string()));
        assert!(store.check_admin("admin"));
        assert!(!store.check_admin("nope"));
        assert!(!TokenStore::new(None).check_admin("admin"));
    }
}
