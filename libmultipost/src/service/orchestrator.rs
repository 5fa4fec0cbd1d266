//! Post orchestrator
//!
//! Drives one submission through every account it targets, one account at a
//! time. For each account the orchestrator waits out the website's interval
//! since its last successful post, optionally re-checks the login, builds the
//! account's [`PostData`] and hands it to the adapter. Whatever the adapter
//! returns is normalized into a [`PostOutcome`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::events::{AccountResult, Event, EventBus};
use super::scaler::{ImageScaler, PassthroughScaler};
use super::state::{PostState, PostTracker};
use super::AccountLocks;
use crate::accounts::{Account, AccountStore};
use crate::cancel::{cancellable_sleep, ensure_not_cancelled, CancellationToken};
use crate::config::PostingConfig;
use crate::error::{MultipostError, Result, WebsiteError};
use crate::registry::AdapterRegistry;
use crate::submission::SubmissionStore;
use crate::types::{
    FilePayload, FileRecord, FileType, PostData, PostOutcome, PostResponse, Submission,
    SubmissionPart, SubmissionType, ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationEngine, ValidationInput};
use crate::websites::{truncate_chars, WebsiteAdapter};

/// Result of posting a submission to one account
#[derive(Debug, Clone, PartialEq)]
pub struct AccountPostResult {
    pub account_id: String,
    pub website: Option<WebsiteId>,
    pub outcome: PostOutcome,
}

impl AccountPostResult {
    pub fn summary(&self) -> AccountResult {
        let response = self.outcome.response();
        AccountResult {
            account_id: self.account_id.clone(),
            website: self.website,
            success: self.outcome.is_success(),
            cancelled: matches!(self.outcome, PostOutcome::Cancelled),
            source: response.and_then(|r| r.source.clone()),
            message: response.map(|r| r.message.clone()),
        }
    }
}

pub struct PostOrchestrator {
    registry: Arc<AdapterRegistry>,
    submissions: Arc<dyn SubmissionStore>,
    accounts: Arc<dyn AccountStore>,
    config: PostingConfig,
    validation: ValidationEngine,
    scaler: Arc<dyn ImageScaler>,
    events: EventBus,
    locks: AccountLocks,
    tracker: PostTracker,
    last_success: Mutex<HashMap<WebsiteId, Instant>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl PostOrchestrator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        submissions: Arc<dyn SubmissionStore>,
        accounts: Arc<dyn AccountStore>,
        config: PostingConfig,
    ) -> Self {
        Self {
            validation: ValidationEngine::new(Arc::clone(&registry)).with_advertisement(config.advertise),
            registry,
            submissions,
            accounts,
            config,
            scaler: Arc::new(PassthroughScaler),
            events: EventBus::default(),
            locks: AccountLocks::default(),
            tracker: PostTracker::new(),
            last_success: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scaler(mut self, scaler: Arc<dyn ImageScaler>) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Share per-account locks with the login refresher
    pub fn with_locks(mut self, locks: AccountLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn tracker(&self) -> &PostTracker {
        &self.tracker
    }

    /// Token for `submission_id`, created on first use
    pub fn cancellation_token(&self, submission_id: &str) -> CancellationToken {
        match self.tokens.lock() {
            Ok(mut tokens) => tokens
                .entry(submission_id.to_string())
                .or_default()
                .clone(),
            Err(_) => CancellationToken::new(),
        }
    }

    /// Signal cancellation; false when the submission is not queued or posting
    pub fn cancel(&self, submission_id: &str) -> bool {
        let token = self
            .tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(submission_id).cloned());
        match token {
            Some(token) => {
                info!(submission = %submission_id, "Cancelling submission");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn release_token(&self, submission_id: &str) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(submission_id);
        }
    }

    async fn load(&self, submission_id: &str) -> Result<(Submission, Vec<SubmissionPart>)> {
        let submission = self
            .submissions
            .get_submission(submission_id)
            .await
            .ok_or_else(|| MultipostError::NotFound(format!("submission {}", submission_id)))?;
        let parts = self.submissions.get_parts(submission_id).await;
        Ok((submission, parts))
    }

    /// Fresh validation of a stored submission, keyed by account id
    pub async fn validate(&self, submission_id: &str) -> Result<HashMap<String, ValidationParts>> {
        let (submission, parts) = self.load(submission_id).await?;
        Ok(self.validation.validate(&submission, &parts))
    }

    /// Refuse submissions that have problems or no account to post to
    pub async fn ensure_postable(&self, submission_id: &str) -> Result<()> {
        let (submission, parts) = self.load(submission_id).await?;
        if !parts.iter().any(|p| !p.is_default) {
            return Err(MultipostError::InvalidInput(format!(
                "Submission {} has no accounts to post to",
                submission_id
            )));
        }

        let problems = self.validation.problems(&submission, &parts);
        if !problems.is_empty() {
            return Err(MultipostError::ValidationFailed { problems });
        }
        Ok(())
    }

    /// Post a stored submission to every account it targets
    ///
    /// Fails only when the submission cannot be posted at all; per-account
    /// failures and cancellation are reported in the results.
    pub async fn post_submission(&self, submission_id: &str) -> Result<Vec<AccountPostResult>> {
        let token = self.cancellation_token(submission_id);
        let result = self.post_with_token(&token, submission_id).await;
        // Every exit path releases the token, cancelled or not
        self.release_token(submission_id);
        result
    }

    async fn post_with_token(
        &self,
        token: &CancellationToken,
        submission_id: &str,
    ) -> Result<Vec<AccountPostResult>> {
        self.ensure_postable(submission_id).await?;
        let (submission, parts) = self.load(submission_id).await?;
        self.post_parts(token, &submission, &parts).await
    }

    async fn post_parts(
        &self,
        token: &CancellationToken,
        submission: &Submission,
        parts: &[SubmissionPart],
    ) -> Result<Vec<AccountPostResult>> {
        let default_part = parts
            .iter()
            .find(|p| p.is_default)
            .ok_or_else(|| MultipostError::InvalidInput(crate::validation::MISSING_DEFAULT_PART.to_string()))?;
        let targets: Vec<&SubmissionPart> = parts.iter().filter(|p| !p.is_default).collect();

        for part in &targets {
            if part.website.is_none() {
                return Err(MultipostError::InvalidInput(format!(
                    "Part for account {} has no website",
                    part.account_id
                )));
            }
            self.tracker.begin(&submission.id, &part.account_id)?;
        }

        info!(submission = %submission.id, accounts = targets.len(), "Posting submission");
        self.events.emit(Event::PostingStarted {
            submission_id: submission.id.clone(),
            accounts: targets.iter().map(|p| p.account_id.clone()).collect(),
        });

        let mut results = Vec::with_capacity(targets.len());
        for part in targets {
            let Some(website) = part.website else {
                continue;
            };
            let outcome = self
                .post_part(token, website, submission, default_part, part)
                .await;
            self.finish(&submission.id, &part.account_id, &outcome)?;
            results.push(AccountPostResult {
                account_id: part.account_id.clone(),
                website: part.website,
                outcome,
            });
        }

        if token.is_cancelled() {
            self.events.emit(Event::PostingCancelled {
                submission_id: submission.id.clone(),
            });
        }
        self.events.emit(Event::PostingCompleted {
            submission_id: submission.id.clone(),
            results: results.iter().map(AccountPostResult::summary).collect(),
        });
        Ok(results)
    }

    fn finish(&self, submission_id: &str, account_id: &str, outcome: &PostOutcome) -> Result<()> {
        let next = match outcome {
            PostOutcome::Succeeded(_) => PostState::Succeeded,
            PostOutcome::Failed(_) => PostState::Failed,
            PostOutcome::Cancelled => PostState::Cancelled,
        };
        self.tracker.transition(submission_id, account_id, next)
    }

    async fn post_part(
        &self,
        token: &CancellationToken,
        website: WebsiteId,
        submission: &Submission,
        default_part: &SubmissionPart,
        part: &SubmissionPart,
    ) -> PostOutcome {
        if token.is_cancelled() {
            return PostOutcome::Cancelled;
        }

        if let Err(e) = self
            .tracker
            .transition(&submission.id, &part.account_id, PostState::InFlight)
        {
            return failure(part, website, &e.to_string());
        }

        let adapter = match self.registry.get_adapter(website) {
            Ok(adapter) => adapter,
            Err(e) => return failure(part, website, &e.to_string()),
        };
        let Some(account) = self.accounts.get(&part.account_id).await else {
            return failure(part, website, &format!("Account {} not found", part.account_id));
        };

        let _guard = self.locks.lock(&account.id).await;
        let result = self
            .attempt(token, adapter.as_ref(), &account, submission, default_part, part)
            .await;

        match result {
            Ok(response) => {
                self.record_success(website);
                info!(account = %account.id, website = %website, source = ?response.source, "Post succeeded");
                PostOutcome::Succeeded(response)
            }
            Err(WebsiteError::Cancelled) => {
                info!(account = %account.id, website = %website, "Post cancelled");
                PostOutcome::Cancelled
            }
            Err(e) => {
                warn!(account = %account.id, website = %website, error = %e, "Post failed");
                PostOutcome::Failed(PostResponse::from_error(website, &e))
            }
        }
    }

    async fn attempt(
        &self,
        token: &CancellationToken,
        adapter: &dyn WebsiteAdapter,
        account: &Account,
        submission: &Submission,
        default_part: &SubmissionPart,
        part: &SubmissionPart,
    ) -> std::result::Result<PostResponse, WebsiteError> {
        self.progress(submission, account, "Waiting");
        self.wait_for_website(token, adapter).await?;

        let refreshed = if adapter.capabilities().refresh_before_post {
            ensure_not_cancelled(token)?;
            Some(self.refresh_login(adapter, account).await?)
        } else {
            None
        };
        let account = refreshed.as_ref().unwrap_or(account);

        let data = self
            .build_post_data(adapter, submission, default_part, part)
            .await?;

        self.progress(submission, account, "Posting");
        ensure_not_cancelled(token)?;
        match submission.submission_type {
            SubmissionType::File => adapter.post_file_submission(token, &data, account).await,
            SubmissionType::Notification => {
                adapter.post_notification_submission(token, &data, account).await
            }
        }
    }

    /// Check the login right before posting; the returned account carries
    /// any login data the check refreshed, already saved to the store.
    /// Callers hold the account lock.
    async fn refresh_login(
        &self,
        adapter: &dyn WebsiteAdapter,
        account: &Account,
    ) -> std::result::Result<Account, WebsiteError> {
        let login = adapter.check_login_status(account).await;
        if !login.logged_in {
            return Err(WebsiteError::Authentication(format!(
                "{} account {} is not logged in",
                adapter.id().display_name(),
                account.id
            )));
        }

        let mut current = account.clone();
        if let Some(data) = login.data {
            current.data = adapter.transform_account_data(data);
            match self.accounts.save(current.clone()).await {
                Ok(()) => debug!(account = %account.id, "Saved refreshed login data"),
                Err(e) => warn!(account = %account.id, error = %e, "Could not save refreshed login data"),
            }
        }
        Ok(current)
    }

    fn progress(&self, submission: &Submission, account: &Account, status: &str) {
        self.events.emit(Event::PostingProgress {
            submission_id: submission.id.clone(),
            account_id: account.id.clone(),
            status: status.to_string(),
        });
    }

    /// Interval between two successful posts to the same website
    pub fn wait_interval(&self, adapter: &dyn WebsiteAdapter) -> Duration {
        self.config
            .wait_override(adapter.id())
            .unwrap_or(adapter.capabilities().wait_between_posts)
    }

    async fn wait_for_website(
        &self,
        token: &CancellationToken,
        adapter: &dyn WebsiteAdapter,
    ) -> std::result::Result<(), WebsiteError> {
        let last = self
            .last_success
            .lock()
            .ok()
            .and_then(|last| last.get(&adapter.id()).copied());

        let remaining = last
            .map(|at| self.wait_interval(adapter).saturating_sub(at.elapsed()))
            .unwrap_or_default();
        if !remaining.is_zero() {
            debug!(website = %adapter.id(), wait = ?remaining, "Waiting before next post");
        }
        cancellable_sleep(token, remaining).await
    }

    fn record_success(&self, website: WebsiteId) {
        if let Ok(mut last) = self.last_success.lock() {
            last.insert(website, Instant::now());
        }
    }

    /// Merge parts, render text and load files for one account
    pub async fn build_post_data(
        &self,
        adapter: &dyn WebsiteAdapter,
        submission: &Submission,
        default_part: &SubmissionPart,
        part: &SubmissionPart,
    ) -> std::result::Result<PostData, WebsiteError> {
        let website = adapter.id();
        let input = ValidationInput::new(submission, default_part, part)?;
        let capabilities = adapter.capabilities();

        let mut description = self
            .registry
            .render_description(adapter, &input.description, self.config.advertise);
        if let Some(max) = capabilities.max_description_length {
            description = truncate_chars(&description, max);
        }

        let mut data = PostData {
            submission_id: submission.id.clone(),
            account_id: part.account_id.clone(),
            title: input.title.clone(),
            description,
            tags: adapter.parse_tags(&input.tags),
            rating: input.rating,
            sources: input.sources.clone(),
            options: part.data.clone(),
            primary: None,
            thumbnail: None,
            additional: Vec::new(),
            fallback: None,
        };

        if submission.submission_type == SubmissionType::Notification {
            return Ok(data);
        }

        let account_id = part.account_id.as_str();
        let auto_scale = input.options.auto_scale;

        if let Some(fallback) = &submission.fallback {
            data.fallback = Some(load_file(fallback).await?);
        }

        if let Some(primary) = submission.primary.as_ref().filter(|f| !f.is_ignored_for(account_id)) {
            let substitute = primary.file_type == FileType::Text
                && !files::is_accepted(&capabilities.accepts_files, primary);
            data.primary = match (&data.fallback, substitute) {
                (Some(fallback), true) => {
                    debug!(website = %website, file = %primary.name, "Using fallback text");
                    Some(fallback.clone())
                }
                _ => Some(self.prepare(adapter, primary, auto_scale).await?),
            };
        }

        if input.options.use_thumbnail {
            if let Some(thumbnail) = &submission.thumbnail {
                data.thumbnail = Some(load_file(thumbnail).await?);
            }
        }

        if capabilities.accepts_additional_files {
            for file in submission
                .additional
                .iter()
                .filter(|f| !f.is_ignored_for(account_id))
                .filter(|f| files::is_accepted(&capabilities.accepts_files, f))
            {
                data.additional.push(self.prepare(adapter, file, auto_scale).await?);
            }
        }

        Ok(data)
    }

    /// Load a file and shrink it when it exceeds the website's ceiling
    async fn prepare(
        &self,
        adapter: &dyn WebsiteAdapter,
        record: &FileRecord,
        auto_scale: bool,
    ) -> std::result::Result<FilePayload, WebsiteError> {
        let payload = load_file(record).await?;
        match adapter.scaling_options(record) {
            Some(options)
                if auto_scale && files::is_scalable_image(record) && record.size > options.max_size =>
            {
                debug!(file = %record.name, max_size = options.max_size, "Scaling image");
                self.scaler.scale(payload, options).await
            }
            _ => Ok(payload),
        }
    }
}

/// Failure raised before the adapter was reached
fn failure(part: &SubmissionPart, website: WebsiteId, message: &str) -> PostOutcome {
    warn!(account = %part.account_id, error = %message, "Post could not start");
    PostOutcome::Failed(PostResponse::failure(website, Some(message.to_string()), None))
}

async fn load_file(record: &FileRecord) -> std::result::Result<FilePayload, WebsiteError> {
    FilePayload::load(record).await.map_err(|e| {
        WebsiteError::InvalidOptions(format!("Could not read {}: {}", record.path.display(), e))
    })
}
