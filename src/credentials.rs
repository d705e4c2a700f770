//! Per-user credentials and the store that resolves them (spec.md §3, §6).
//!
//! The persistent credential store itself is an external collaborator; this
//! module defines the contract (`CredentialsStore`) plus a minimal in-memory
//! implementation usable by the demo binary and by tests.

use std::collections::HashMap;

/// Opaque, never-logged per-user auth material. `Debug` is intentionally
/// hand-rolled to redact both fields.
#[derive(Clone)]
pub struct UserCredentials {
    pub headers: HashMap<String, String>,
    pub cookies: String,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("headers", &"<redacted>")
            .field("cookies", &"<redacted>")
            .finish()
    }
}

pub trait CredentialsStore: Send + Sync {
    fn get_credentials(&self, user_id: i64) -> Option<UserCredentials>;
}

#[derive(Default)]
pub struct InMemoryCredentialsStore {
    entries: HashMap<i64, UserCredentials>,
}

impl InMemoryCredentialsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: i64, creds: UserCredentials) {
        self.entries.insert(user_id, creds);
    }
}

impl CredentialsStore for InMemoryCredentialsStore {
    fn get_credentials(&self, user_id: i64) -> Option<UserCredentials> {
        self.entries.get(&user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_secrets() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "super-secret-token".to_string());
        let creds = UserCredentials {
            headers,
            cookies: "session=abc123".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("super-secret-token"));
        assert!(!rendered.contains("abc123"));
    }

    #[test]
    fn store_roundtrips_inserted_credentials() {
        let mut store = InMemoryCredentialsStore::new();
        store.insert(
            1,
            UserCredentials {
                headers: HashMap::new(),
                cookies: "c".into(),
            },
        );
        assert!(store.get_credentials(1).is_some());
        assert!(store.get_credentials(2).is_none());
    }
}
