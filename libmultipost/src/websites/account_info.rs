//! Per-adapter account information
//!
//! Login checks discover data that later validation and posting need: the
//! folders an artist can file into, the tiers of a creator campaign, a
//! refreshed OAuth token or the logged-in username. Each adapter owns one
//! [`AccountInfoStore`]; entries are keyed by account id and are only ever
//! read back under the id they were written with.

use std::collections::HashMap;
use std::mem::discriminant;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub id: String,
    pub title: String,
    pub amount_cents: Option<u64>,
}

/// OAuth access token with its expiry
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Expired, or expiring within `margin_secs`
    pub fn is_expired(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now + chrono::Duration::seconds(margin_secs))
    }

    pub fn bearer(&self) -> &str {
        self.access_token.expose_secret()
    }
}

#[derive(Debug, Clone)]
pub enum AccountInfo {
    Folders(Vec<Folder>),
    Tiers(Vec<Tier>),
    Token(AccessToken),
    Username(String),
}

#[derive(Default)]
pub struct AccountInfoStore {
    entries: RwLock<HashMap<String, Vec<AccountInfo>>>,
}

impl AccountInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `info`, replacing any entry of the same kind for the account
    pub fn set(&self, account_id: &str, info: AccountInfo) {
        if let Ok(mut entries) = self.entries.write() {
            let list = entries.entry(account_id.to_string()).or_default();
            list.retain(|existing| discriminant(existing) != discriminant(&info));
            list.push(info);
        }
    }

    fn find<T>(&self, account_id: &str, pick: impl Fn(&AccountInfo) -> Option<T>) -> Option<T> {
        self.entries
            .read()
            .ok()?
            .get(account_id)?
            .iter()
            .find_map(pick)
    }

    pub fn folders(&self, account_id: &str) -> Option<Vec<Folder>> {
        self.find(account_id, |info| match info {
            AccountInfo::Folders(folders) => Some(folders.clone()),
            _ => None,
        })
    }

    pub fn tiers(&self, account_id: &str) -> Option<Vec<Tier>> {
        self.find(account_id, |info| match info {
            AccountInfo::Tiers(tiers) => Some(tiers.clone()),
            _ => None,
        })
    }

    pub fn token(&self, account_id: &str) -> Option<AccessToken> {
        self.find(account_id, |info| match info {
            AccountInfo::Token(token) => Some(token.clone()),
            _ => None,
        })
    }

    pub fn username(&self, account_id: &str) -> Option<String> {
        self.find(account_id, |info| match info {
            AccountInfo::Username(name) => Some(name.clone()),
            _ => None,
        })
    }

    /// Forget everything known about the account
    pub fn clear(&self, account_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(account_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str) -> Folder {
        Folder {
            id: id.to_string(),
            name: format!("Folder {}", id),
        }
    }

    #[test]
    fn test_entries_are_scoped_to_account() {
        let store = AccountInfoStore::new();
        store.set("a", AccountInfo::Folders(vec![folder("1")]));
        store.set("a", AccountInfo::Username("alice".to_string()));

        assert_eq!(store.folders("a"), Some(vec![folder("1")]));
        assert_eq!(store.username("a").as_deref(), Some("alice"));
        assert_eq!(store.folders("b"), None);
        assert!(store.tiers("a").is_none());
    }

    #[test]
    fn test_set_replaces_same_kind() {
        let store = AccountInfoStore::new();
        store.set("a", AccountInfo::Folders(vec![folder("1")]));
        store.set("a", AccountInfo::Folders(vec![folder("2"), folder("3")]));
        assert_eq!(store.folders("a").unwrap().len(), 2);
    }

    #[test]
    fn test_clear() {
        let store = AccountInfoStore::new();
        store.set("a", AccountInfo::Username("alice".to_string()));
        store.clear("a");
        assert!(store.username("a").is_none());
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let token = AccessToken {
            access_token: SecretString::from("abc".to_string()),
            refresh_token: None,
            expires_at: Some(now + chrono::Duration::seconds(30)),
        };
        assert!(!token.is_expired(now, 0));
        assert!(token.is_expired(now, 60));
        assert_eq!(token.bearer(), "abc");

        let forever = AccessToken {
            expires_at: None,
            ..token
        };
        assert!(!forever.is_expired(now, 60));
    }
}
