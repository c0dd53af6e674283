//! Credential storage for remote endpoints.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// A username/password pair for a remote endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Credential {
    /// Creates a credential.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persists endpoint credentials outside the session.
///
/// Engines look credentials up by remote URL, so they never travel in the
/// property snapshot.
pub trait CredentialStore: Send + Sync {
    /// Returns the credential saved for `url`.
    fn get(&self, url: &str) -> Option<Credential>;

    /// Saves a credential for `url`, replacing any previous one.
    fn save(&self, url: &str, credential: Credential);

    /// Removes the credential for `url`, returning it.
    fn remove(&self, url: &str) -> Option<Credential>;
}

/// An in-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored credentials.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no credentials are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, url: &str) -> Option<Credential> {
        self.entries.read().get(url).cloned()
    }

    fn save(&self, url: &str, credential: Credential) {
        self.entries.write().insert(url.to_owned(), credential);
    }

    fn remove(&self, url: &str) -> Option<Credential> {
        self.entries.write().remove(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_get_remove() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty());

        store.save("https://a", Credential::new("alice", "secret"));
        assert_eq!(store.get("https://a"), Some(Credential::new("alice", "secret")));
        assert_eq!(store.get("https://b"), None);

        store.save("https://a", Credential::new("alice", "rotated"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove("https://a").map(|c| c.password), Some("rotated".into()));
        assert!(store.is_empty());
    }

    #[test]
    fn debug_redacts_password() {
        let text = format!("{:?}", Credential::new("alice", "secret"));
        assert!(text.contains("alice"));
        assert!(!text.contains("secret"));
    }
}
