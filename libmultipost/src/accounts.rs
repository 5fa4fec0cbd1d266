//! Accounts and the account store boundary
//!
//! Persistence of accounts is owned by the embedding application. The
//! library only needs to look accounts up by id and to hand sanitized login
//! data back for storage, so the boundary is the small [`AccountStore`] trait.
//! [`MemoryAccountStore`] backs the CLI (accounts come from the config file)
//! and the tests.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MultipostError, Result};
use crate::types::WebsiteId;

/// Ids that would be ambiguous on the command line
const RESERVED_IDS: [&str; 3] = ["all", "none", "default"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub website: WebsiteId,
    #[serde(default)]
    pub alias: String,
    /// Adapter-specific login material
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Account {
    pub fn new(id: impl Into<String>, website: WebsiteId, data: serde_json::Value) -> Self {
        let id = id.into();
        Self {
            alias: id.clone(),
            id,
            website,
            data,
        }
    }

    /// Validate account id format
    ///
    /// Rules:
    /// - Alphanumeric characters, hyphens, and underscores only
    /// - Maximum 64 characters
    /// - Cannot be empty or reserved
    pub fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(MultipostError::InvalidInput(
                "Account id cannot be empty".to_string(),
            ));
        }

        if id.len() > 64 {
            return Err(MultipostError::InvalidInput(format!(
                "Account id too long: {} characters (max 64)",
                id.len()
            )));
        }

        if !id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return Err(MultipostError::InvalidInput(format!(
                "Invalid account id '{}'. Must be alphanumeric with hyphens/underscores only",
                id
            )));
        }

        if RESERVED_IDS.contains(&id.to_lowercase().as_str()) {
            return Err(MultipostError::InvalidInput(format!(
                "Account id '{}' is reserved",
                id
            )));
        }

        Ok(())
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<Account>;

    async fn list(&self) -> Vec<Account>;

    async fn save(&self, account: Account) -> Result<()>;

    /// Returns whether an account was removed
    async fn remove(&self, id: &str) -> bool;
}

/// In-memory account store
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    accounts: Arc<RwLock<BTreeMap<String, Account>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let map = accounts.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            accounts: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, id: &str) -> Option<Account> {
        self.accounts.read().ok()?.get(id).cloned()
    }

    async fn list(&self) -> Vec<Account> {
        self.accounts
            .read()
            .map(|accounts| accounts.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn save(&self, account: Account) -> Result<()> {
        Account::validate_id(&account.id)?;
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| MultipostError::InvalidInput("Account store is poisoned".to_string()))?;
        accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn remove(&self, id: &str) -> bool {
        self.accounts
            .write()
            .map(|mut accounts| accounts.remove(id).is_some())
            .unwrap_or(false)
    }
}
