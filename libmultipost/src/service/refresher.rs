//! Periodic login checks
//!
//! Each account is re-checked once its adapter's `refresh_interval` has
//! passed. Checks take the same per-account lock as posting, so a refresh
//! never interleaves with a post to the same account. Login data handed back
//! by the adapter (refreshed tokens) is sanitized and saved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{Event, EventBus};
use super::AccountLocks;
use crate::accounts::{Account, AccountStore};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::registry::AdapterRegistry;
use crate::types::LoginResponse;

/// How often the background loop looks for accounts that are due
const TICK: Duration = Duration::from_secs(60);

pub struct LoginRefresher {
    registry: Arc<AdapterRegistry>,
    accounts: Arc<dyn AccountStore>,
    locks: AccountLocks,
    events: EventBus,
}

impl LoginRefresher {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        accounts: Arc<dyn AccountStore>,
        locks: AccountLocks,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            accounts,
            locks,
            events,
        }
    }

    pub async fn refresh_account(&self, account: &Account) -> Result<LoginResponse> {
        let adapter = self.registry.get_adapter(account.website)?;
        let _guard = self.locks.lock(&account.id).await;

        let login = adapter.check_login_status(account).await;
        if let Some(data) = login.data.clone() {
            let mut updated = account.clone();
            updated.data = adapter.transform_account_data(data);
            self.accounts.save(updated).await?;
            debug!(account = %account.id, "Saved refreshed login data");
        }

        if login.logged_in {
            info!(account = %account.id, website = %account.website, username = ?login.username, "Logged in");
        } else {
            warn!(account = %account.id, website = %account.website, "Not logged in");
        }
        self.events.emit(Event::LoginChecked {
            account_id: account.id.clone(),
            website: account.website,
            logged_in: login.logged_in,
            username: login.username.clone(),
        });
        Ok(login)
    }

    /// Check every stored account once
    pub async fn refresh_all(&self) -> Vec<(String, LoginResponse)> {
        let mut results = Vec::new();
        for account in self.accounts.list().await {
            match self.refresh_account(&account).await {
                Ok(login) => results.push((account.id, login)),
                Err(e) => warn!(account = %account.id, error = %e, "Login check failed"),
            }
        }
        results
    }

    /// Accounts whose adapter interval has passed since their last check
    async fn due_accounts(&self, last_checked: &HashMap<String, Instant>) -> Vec<Account> {
        let mut due = Vec::new();
        for account in self.accounts.list().await {
            let Ok(adapter) = self.registry.get_adapter(account.website) else {
                continue;
            };
            let interval = adapter.capabilities().refresh_interval;
            let is_due = last_checked
                .get(&account.id)
                .map_or(true, |at| at.elapsed() >= interval);
            if is_due {
                due.push(account);
            }
        }
        due
    }

    /// Run the refresh loop until `token` is cancelled
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_checked: HashMap<String, Instant> = HashMap::new();
            loop {
                for account in self.due_accounts(&last_checked).await {
                    if token.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.refresh_account(&account).await {
                        warn!(account = %account.id, error = %e, "Login check failed");
                    }
                    last_checked.insert(account.id, Instant::now());
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(TICK) => {}
                }
            }
            debug!("Login refresher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccountStore;
    use crate::transport::MockTransport;
    use crate::types::WebsiteId;

    #[tokio::test]
    async fn test_failed_login_is_reported() {
        let registry = Arc::new(AdapterRegistry::with_defaults(Arc::new(MockTransport::new())));
        let account = Account::new("ws", WebsiteId::Weasyl, serde_json::json!({}));
        let accounts = Arc::new(MemoryAccountStore::with_accounts([account.clone()]));
        let events = EventBus::new(10);
        let mut receiver = events.subscribe();

        let refresher = LoginRefresher::new(registry, accounts, AccountLocks::default(), events);
        let login = refresher.refresh_account(&account).await.unwrap();
        assert!(!login.logged_in);

        match receiver.recv().await.unwrap() {
            Event::LoginChecked { account_id, website, logged_in, .. } => {
                assert_eq!(account_id, "ws");
                assert_eq!(website, WebsiteId::Weasyl);
                assert!(!logged_in);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_cancel() {
        let registry = Arc::new(AdapterRegistry::with_defaults(Arc::new(MockTransport::new())));
        let refresher = Arc::new(LoginRefresher::new(
            registry,
            Arc::new(MemoryAccountStore::new()),
            AccountLocks::default(),
            EventBus::default(),
        ));
        let token = CancellationToken::new();
        let handle = refresher.spawn(token.clone());
        token.cancel();
        handle.await.unwrap();
    }
}
