use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::storage::Storage;

const TOKEN_KEY: &str = "accessToken";

/// Tokens live for one hour from issue. There is no refresh flow, so an
/// expired token forces a new consent.
pub const TOKEN_LIFETIME_SECS: i64 = 60 * 60;

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub access_token: String,
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
    pub user_email: Option<String>,
}

impl CachedToken {
    pub fn issued_at(access_token: String, issued: DateTime<Utc>) -> Self {
        Self {
            access_token,
            expires_at: issued + Duration::seconds(TOKEN_LIFETIME_SECS),
            user_email: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user_email", &self.user_email)
            .finish()
    }
}

/// Persists the current token in the cloud session store.
#[derive(Clone)]
pub struct TokenCache {
    storage: Storage,
}

impl TokenCache {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Returns the cached token, purging entries that cannot be decoded.
    pub fn load(&self) -> Option<CachedToken> {
        let value = self.storage.get(TOKEN_KEY)?;
        match serde_json::from_value::<CachedToken>(value) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Discarding unreadable cached token: {}", e);
                self.purge();
                None
            }
        }
    }

    pub fn store(&self, token: &CachedToken) -> bool {
        match serde_json::to_value(token) {
            Ok(value) => self.storage.set(TOKEN_KEY, value),
            Err(e) => {
                warn!("Failed to serialize token: {}", e);
                false
            }
        }
    }

    pub fn purge(&self) -> bool {
        self.storage.remove(TOKEN_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifetime_is_one_hour() {
        let issued = Utc::now();
        let token = CachedToken::issued_at("ya29.token".into(), issued);
        assert_eq!(token.expires_at - issued, Duration::hours(1));
        assert!(!token.is_expired_at(issued + Duration::minutes(59)));
        assert!(token.is_expired_at(issued + Duration::hours(1)));
    }

    #[test]
    fn debug_redacts_secret() {
        let token = CachedToken::issued_at("ya29.secret".into(), Utc::now());
        assert!(!format!("{:?}", token).contains("ya29.secret"));
    }

    #[test]
    fn cache_round_trip_and_purge() {
        let cache = TokenCache::new(Storage::in_memory());
        assert!(cache.load().is_none());

        let mut token = CachedToken::issued_at("ya29.token".into(), Utc::now());
        token.user_email = Some("owner@acesnooker.ie".into());
        assert!(cache.store(&token));
        let loaded = cache.load().unwrap();
        assert_eq!(loaded.access_token, "ya29.token");
        assert_eq!(loaded.user_email.as_deref(), Some("owner@acesnooker.ie"));

        cache.purge();
        assert!(cache.load().is_none());
    }

    #[test]
    fn garbage_entry_is_purged() {
        let storage = Storage::in_memory();
        storage.set(TOKEN_KEY, json!({ "unexpected": true }));
        let cache = TokenCache::new(storage.clone());
        assert!(cache.load().is_none());
        assert!(storage.get(TOKEN_KEY).is_none());
    }
}
