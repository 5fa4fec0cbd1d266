//! Service layer for Multipost
//!
//! This module provides the posting API consumed by the CLI and by embedding
//! applications.
//!
//! # Architecture
//!
//! `MultipostService` is the facade. It owns one adapter registry and wires
//! the specialized parts around it:
//!
//! - `PostOrchestrator`: posts one submission to each of its accounts
//! - `PostQueue`: single worker draining queued submissions
//! - `LoginRefresher`: periodic login checks per account
//! - `EventBus`: progress event distribution
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libmultipost::config::Config;
//! use libmultipost::service::MultipostService;
//! use libmultipost::submission::{MemorySubmissionStore, SubmissionBundle};
//!
//! # async fn example() -> libmultipost::Result<()> {
//! let config = Config::load()?;
//! let submissions = Arc::new(MemorySubmissionStore::new());
//! let bundle = SubmissionBundle::load(std::path::Path::new("art.json"))?;
//! let submission_id = bundle.submission.id.clone();
//! submissions.insert_bundle(bundle)?;
//!
//! let service = MultipostService::from_config(&config, submissions)?;
//! let results = service.post(&submission_id).await?.await;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod orchestrator;
pub mod queue;
pub mod refresher;
pub mod scaler;
pub mod state;

pub use events::AccountResult;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::info;

use self::events::{EventBus, EventReceiver};
use self::orchestrator::PostOrchestrator;
use self::queue::{PostQueue, PostReceiver};
use self::refresher::LoginRefresher;
use crate::accounts::{Account, AccountStore, MemoryAccountStore};
use crate::config::{Config, PostingConfig};
use crate::error::{MultipostError, Result};
use crate::registry::AdapterRegistry;
use crate::submission::SubmissionStore;
use crate::transport::HttpTransport;
use crate::types::{LoginResponse, ValidationParts};

/// One async lock per account id
///
/// Posting and login refresh both take the account's lock, so work on one
/// account is serialized while different accounts proceed independently.
#[derive(Clone, Default)]
pub struct AccountLocks(Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>);

impl AccountLocks {
    pub async fn lock(&self, account_id: &str) -> OwnedMutexGuard<()> {
        let lock = match self.0.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(account_id.to_string()).or_default()),
            // A poisoned map only loses sharing, never the guard itself
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        };
        lock.lock_owned().await
    }
}

/// Main service facade
///
/// Must be created inside a Tokio runtime: construction spawns the post
/// queue worker.
pub struct MultipostService {
    registry: Arc<AdapterRegistry>,
    accounts: Arc<dyn AccountStore>,
    orchestrator: Arc<PostOrchestrator>,
    refresher: Arc<LoginRefresher>,
    queue: PostQueue,
    worker: JoinHandle<()>,
    event_bus: EventBus,
}

impl MultipostService {
    /// Build a service around an HTTP transport and the configured accounts
    pub fn from_config(config: &Config, submissions: Arc<dyn SubmissionStore>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.transport)?);
        let registry = Arc::new(AdapterRegistry::with_defaults(transport));
        let accounts = Arc::new(MemoryAccountStore::with_accounts(config.accounts.clone()));
        Ok(Self::new(registry, submissions, accounts, config.posting.clone()))
    }

    /// Build a service from explicit parts
    pub fn new(
        registry: Arc<AdapterRegistry>,
        submissions: Arc<dyn SubmissionStore>,
        accounts: Arc<dyn AccountStore>,
        posting: PostingConfig,
    ) -> Self {
        let event_bus = EventBus::new(100);
        let locks = AccountLocks::default();

        let orchestrator = Arc::new(
            PostOrchestrator::new(
                Arc::clone(&registry),
                submissions,
                Arc::clone(&accounts),
                posting,
            )
            .with_event_bus(event_bus.clone())
            .with_locks(locks.clone()),
        );
        let refresher = Arc::new(LoginRefresher::new(
            Arc::clone(&registry),
            Arc::clone(&accounts),
            locks,
            event_bus.clone(),
        ));
        let (queue, worker) = PostQueue::start(Arc::clone(&orchestrator));

        Self {
            registry,
            accounts,
            orchestrator,
            refresher,
            queue,
            worker,
            event_bus,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &PostOrchestrator {
        &self.orchestrator
    }

    pub fn refresher(&self) -> Arc<LoginRefresher> {
        Arc::clone(&self.refresher)
    }

    pub fn queue(&self) -> &PostQueue {
        &self.queue
    }

    /// Subscribe to service events
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    pub async fn validate(&self, submission_id: &str) -> Result<HashMap<String, ValidationParts>> {
        self.orchestrator.validate(submission_id).await
    }

    /// Queue a submission; the receiver resolves with per-account results
    pub async fn post(&self, submission_id: &str) -> Result<PostReceiver> {
        self.queue.enqueue(submission_id).await
    }

    pub fn cancel(&self, submission_id: &str) -> bool {
        self.queue.cancel(submission_id)
    }

    /// Store an account, keeping only the login data its adapter persists
    pub async fn add_account(&self, mut account: Account) -> Result<()> {
        Account::validate_id(&account.id)?;
        let adapter = self.registry.get_adapter(account.website)?;
        account.data = adapter.transform_account_data(account.data);
        info!(account = %account.id, website = %account.website, "Adding account");
        self.accounts.save(account).await
    }

    /// Delete an account together with its cookies and cached information
    pub async fn remove_account(&self, account_id: &str) -> bool {
        let removed = self.accounts.remove(account_id).await;
        if removed {
            self.registry.clear_account(account_id);
        }
        removed
    }

    pub async fn check_login(&self, account_id: &str) -> Result<LoginResponse> {
        let account = self
            .accounts
            .get(account_id)
            .await
            .ok_or_else(|| MultipostError::NotFound(format!("account {}", account_id)))?;
        self.refresher.refresh_account(&account).await
    }

    /// Stop accepting posts and wait for queued ones to finish
    pub async fn shutdown(self) {
        drop(self.queue);
        let _ = self.worker.await;
    }
}
