//! Website adapters
//!
//! Every supported website is an independent struct implementing
//! [`WebsiteAdapter`]. The orchestrator and the validation engine only ever
//! see this trait, so adding a website means adding one module and one line
//! in [`crate::registry::AdapterRegistry::with_defaults`].
//!
//! An adapter bundles three kinds of knowledge:
//!
//! - static capabilities ([`Capabilities`], rating codes, tag and
//!   description rules)
//! - pure inspection of a merged submission (`validate_*`)
//! - the side-effecting protocol that logs in and posts (`check_login_status`,
//!   `post_*`)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::accounts::Account;
use crate::cancel::{ensure_not_cancelled, CancellationToken};
use crate::description::{expand_shortcuts, DescriptionPipeline, UsernameShortcut};
use crate::error::WebsiteError;
use crate::tags::{parse_tags, FormattedTags, TagFormat};
use crate::transport::{verify_response, RequestOptions, Transport, TransportResponse};
use crate::types::{
    FileRecord, LoginResponse, PostData, PostResponse, ScalingOptions, SubmissionRating,
    ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationInput};

pub mod account_info;
pub mod derpibooru;
pub mod discord;
pub mod furaffinity;
pub mod mastodon;
pub mod patreon;
pub mod weasyl;

pub use account_info::{AccessToken, AccountInfo, AccountInfoStore, Folder, Tier};

/// One mebibyte, the unit of every file ceiling
pub const MB: u64 = 1024 * 1024;

/// Static, per-adapter constants
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Accepted extensions (`png`), mimetypes (`image/png`) or mimetype
    /// families (`image/*`); empty accepts anything
    pub accepts_files: Vec<&'static str>,
    pub accepts_additional_files: bool,
    pub accepts_source_urls: bool,
    pub supports_notifications: bool,
    /// Pause between two successful posts to this website
    pub wait_between_posts: Duration,
    /// How often the login refresher re-checks accounts
    pub refresh_interval: Duration,
    /// Re-check the login right before posting
    pub refresh_before_post: bool,
    pub enable_advertisement: bool,
    /// Rendered descriptions longer than this are truncated at post time
    pub max_description_length: Option<usize>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            accepts_files: Vec::new(),
            accepts_additional_files: false,
            accepts_source_urls: false,
            supports_notifications: true,
            wait_between_posts: Duration::from_secs(4),
            refresh_interval: Duration::from_secs(30 * 60),
            refresh_before_post: false,
            enable_advertisement: true,
            max_description_length: None,
        }
    }
}

#[async_trait]
pub trait WebsiteAdapter: Send + Sync {
    fn id(&self) -> WebsiteId;

    fn capabilities(&self) -> &Capabilities;

    fn description_pipeline(&self) -> &DescriptionPipeline;

    fn tag_format(&self) -> &TagFormat;

    fn account_info(&self) -> &AccountInfoStore;

    /// Shortcut keys this website owns
    fn username_shortcuts(&self) -> &[UsernameShortcut] {
        &[]
    }

    /// Site code for a rating; `None` means the website cannot take it
    fn rating_code(&self, rating: SubmissionRating) -> Option<String> {
        Some(rating.to_string())
    }

    /// Authenticated read(s) deciding whether the account is usable
    ///
    /// Never fails: any error resolves to a logged-out response.
    async fn check_login_status(&self, account: &Account) -> LoginResponse;

    /// Render this website's own shortcuts before generic conversion
    fn preparse_description(&self, text: &str) -> String {
        expand_shortcuts(text, self.username_shortcuts(), |shortcut, name| {
            shortcut.link_html(name)
        })
    }

    fn parse_description(&self, text: &str) -> String {
        self.description_pipeline()
            .apply(&self.preparse_description(text))
    }

    fn postparse_description(&self, text: &str) -> String {
        text.to_string()
    }

    fn parse_tags(&self, tags: &[String]) -> Vec<String> {
        parse_tags(tags, &self.tag_format().parse)
    }

    fn format_tags(&self, tags: &[String]) -> FormattedTags {
        self.tag_format().format(tags)
    }

    /// Byte ceiling for `file`, handed to the image scaler
    fn scaling_options(&self, _file: &FileRecord) -> Option<ScalingOptions> {
        None
    }

    fn validate_file_submission(&self, input: &ValidationInput) -> ValidationParts {
        files::check_files(self, input)
    }

    fn validate_notification_submission(&self, _input: &ValidationInput) -> ValidationParts {
        ValidationParts::default()
    }

    async fn post_file_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError>;

    async fn post_notification_submission(
        &self,
        _token: &CancellationToken,
        _data: &PostData,
        _account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        Err(WebsiteError::NotSupported(format!(
            "{} does not support notifications",
            self.id().display_name()
        )))
    }

    /// Strip secrets and noise from login data before it is persisted
    fn transform_account_data(&self, data: serde_json::Value) -> serde_json::Value {
        data
    }
}

/// Run `attempt`, and once more if it fails
///
/// The first error is logged and dropped; the second attempt's result is
/// returned as is. Cancellation is never retried.
pub async fn retry_once<T, F, Fut>(website: WebsiteId, mut attempt: F) -> Result<T, WebsiteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WebsiteError>>,
{
    match attempt().await {
        Err(e) if !e.is_cancelled() => {
            warn!(website = %website, error = %e, "Post attempt failed, retrying once");
            attempt().await
        }
        result => result,
    }
}

/// Transport wrapper shared by the adapters
///
/// Checks the cancellation token right before every request and rejects
/// responses outside the success range.
#[derive(Clone)]
pub struct WebsiteClient {
    website: WebsiteId,
    transport: Arc<dyn Transport>,
}

impl WebsiteClient {
    pub fn new(website: WebsiteId, transport: Arc<dyn Transport>) -> Self {
        Self { website, transport }
    }

    pub async fn get(
        &self,
        token: &CancellationToken,
        url: &str,
        account_id: &str,
        options: RequestOptions,
    ) -> Result<TransportResponse, WebsiteError> {
        ensure_not_cancelled(token)?;
        let response = self.transport.get(url, account_id, options).await;
        verify_response(self.website, &response)?;
        Ok(response)
    }

    pub async fn post(
        &self,
        token: &CancellationToken,
        url: &str,
        account_id: &str,
        options: RequestOptions,
    ) -> Result<TransportResponse, WebsiteError> {
        ensure_not_cancelled(token)?;
        let response = self.transport.post(url, account_id, options).await;
        verify_response(self.website, &response)?;
        Ok(response)
    }

    /// Like [`get`](Self::get) outside of any post (login checks)
    pub async fn read(&self, url: &str, account_id: &str, options: RequestOptions) -> Result<TransportResponse, WebsiteError> {
        self.get(&CancellationToken::new(), url, account_id, options).await
    }
}

/// Decode an account's login data
pub fn account_data<T: DeserializeOwned>(website: WebsiteId, account: &Account) -> Result<T, WebsiteError> {
    serde_json::from_value(account.data.clone()).map_err(|e| {
        WebsiteError::Authentication(format!(
            "{} account {} has incomplete login data: {}",
            website.display_name(),
            account.id,
            e
        ))
    })
}

/// Site code for the post's rating, failing when it is missing or unsupported
pub fn require_rating_code<A: WebsiteAdapter + ?Sized>(adapter: &A, data: &PostData) -> Result<String, WebsiteError> {
    let rating = data.require_rating(adapter.id())?;
    adapter
        .rating_code(rating)
        .ok_or_else(|| WebsiteError::InvalidOptions(unsupported_rating(adapter.id(), rating)))
}

pub fn unsupported_rating(website: WebsiteId, rating: SubmissionRating) -> String {
    format!("{} does not support rating: {}", website.display_name(), rating)
}

/// First capture group of `pattern` in `body`
pub fn capture(pattern: &Regex, body: &str) -> Option<String> {
    pattern
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

// Parsed documents are not `Send`, so these helpers parse and drop the page
// before returning and never hold it across an await.

/// Trimmed text of the first element matching `selector`
pub fn select_text(body: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(body);
    let text = document
        .select(selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty());
    text
}

/// Attribute `name` of the first element matching `selector` that has it
pub fn select_attr(body: &str, selector: &Selector, name: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let value = document
        .select(selector)
        .find_map(|element| element.value().attr(name))
        .map(str::to_string);
    value
}

/// `(value, text)` of every element matching `selector`, usually `<option>`s
pub fn select_options(body: &str, selector: &Selector) -> Vec<(String, String)> {
    let document = Html::parse_document(body);
    let options = document
        .select(selector)
        .filter_map(|element| {
            let value = element.value().attr("value")?.to_string();
            Some((value, element.text().collect::<String>().trim().to_string()))
        })
        .collect();
    options
}

/// Cut `text` to at most `max` characters
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
