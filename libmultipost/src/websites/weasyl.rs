//! Weasyl
//!
//! Authenticated with an API key sent as `X-Weasyl-API-Key`. Uploads go
//! through the regular submission forms: fetch the form token, submit, then
//! confirm the thumbnail when Weasyl redirects to its thumbnail page.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::Selector;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    account_data, require_rating_code, retry_once, select_attr, select_text, unsupported_rating,
    AccountInfo, AccountInfoStore, Capabilities, Folder, WebsiteAdapter, WebsiteClient, MB,
};
use crate::accounts::Account;
use crate::cancel::CancellationToken;
use crate::description::{DescriptionParser, DescriptionPipeline, Rewrite, UsernameShortcut};
use crate::error::WebsiteError;
use crate::tags::{TagFormat, TagJoin};
use crate::transport::{FormField, RequestOptions, Transport};
use crate::types::{
    DefaultOptions, FileRecord, FileType, LoginResponse, PostData, PostResponse, ScalingOptions,
    SubmissionRating, ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationInput};

pub const BASE_URL: &str = "https://www.weasyl.com";
pub const API_KEY_HEADER: &str = "X-Weasyl-API-Key";
pub const MIN_TAGS: usize = 2;

static FORM_TOKEN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="token"]"#).unwrap());
static SUBMIT_ID: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="submitid"]"#).unwrap());
static ERROR_MESSAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#error_content p").unwrap());

static PARAGRAPH_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<p(\s|>)").unwrap());
static PARAGRAPH_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</p>").unwrap());

const SHORTCUTS: [UsernameShortcut; 1] = [UsernameShortcut::new("ws", "https://www.weasyl.com/~$1")];

struct WeasylAccountData {
    api_key: SecretString,
}

impl<'de> Deserialize<'de> for WeasylAccountData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            api_key: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            api_key: SecretString::from(raw.api_key),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    login: String,
}

#[derive(Debug, Deserialize)]
struct UserView {
    #[serde(default)]
    folders: Vec<WeasylFolder>,
}

#[derive(Debug, Deserialize)]
struct WeasylFolder {
    folder_id: u64,
    title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeasylOptions {
    #[serde(flatten)]
    pub defaults: DefaultOptions,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub critique: bool,
    /// Suppress notifications to watchers
    #[serde(default)]
    pub no_notification: bool,
}

pub struct Weasyl {
    client: WebsiteClient,
    base_url: String,
    capabilities: Capabilities,
    pipeline: DescriptionPipeline,
    tags: TagFormat,
    info: AccountInfoStore,
}

impl Weasyl {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let pipeline = DescriptionPipeline::new(DescriptionParser::Html)
            .with_rewrite(Rewrite::from_regex(&PARAGRAPH_OPEN, "<div$1"))
            .with_rewrite(Rewrite::from_regex(&PARAGRAPH_CLOSE, "</div>"));

        Self {
            client: WebsiteClient::new(WebsiteId::Weasyl, transport),
            base_url: BASE_URL.to_string(),
            capabilities: Capabilities {
                accepts_files: vec![
                    "png", "jpeg", "jpg", "gif", "md", "txt", "pdf", "swf", "mp3",
                ],
                ..Default::default()
            },
            pipeline,
            tags: TagFormat::new(TagJoin::Space),
            info: AccountInfoStore::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth(&self, account: &Account) -> Result<RequestOptions, WebsiteError> {
        let data = account_data::<WeasylAccountData>(self.id(), account)?;
        Ok(RequestOptions::new().header(API_KEY_HEADER, data.api_key.expose_secret()))
    }

    async fn load_account(&self, account: &Account) -> Result<String, WebsiteError> {
        let whoami = self
            .client
            .read(&self.url("/api/whoami"), &account.id, self.auth(account)?)
            .await?
            .json::<WhoAmI>()?
            .body;

        let view = self
            .client
            .read(
                &self.url(&format!("/api/users/{}/view", whoami.login)),
                &account.id,
                self.auth(account)?,
            )
            .await?
            .json::<UserView>()?
            .body;

        let folders = view
            .folders
            .into_iter()
            .map(|f| Folder {
                id: f.folder_id.to_string(),
                name: f.title,
            })
            .collect();
        self.info.set(&account.id, AccountInfo::Folders(folders));
        self.info.set(&account.id, AccountInfo::Username(whoami.login.clone()));
        Ok(whoami.login)
    }

    async fn form_token(&self, token: &CancellationToken, path: &str, account: &Account) -> Result<String, WebsiteError> {
        let page = self
            .client
            .get(token, &self.url(path), &account.id, self.auth(account)?)
            .await?;
        select_attr(&page.body, &FORM_TOKEN, "value")
            .ok_or_else(|| WebsiteError::protocol("Weasyl form token not found", page.body))
    }

    async fn submit_once(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let options: WeasylOptions = data.options_as()?;
        let rating = require_rating_code(self, data)?;
        let primary = data
            .primary
            .as_ref()
            .or(data.fallback.as_ref())
            .ok_or_else(|| WebsiteError::InvalidOptions("Submission has no primary file".to_string()))?;

        let path = match primary.file_type {
            FileType::Text => "/submit/literary",
            FileType::Audio | FileType::Video => "/submit/multimedia",
            _ => "/submit/visual",
        };

        let form_token = self.form_token(token, path, account).await?;

        let mut fields = vec![
            FormField::text("token", form_token.clone()),
            FormField::text("title", data.title.clone()),
            FormField::text("content", data.description.clone()),
            FormField::text("tags", self.format_tags(&data.tags).as_joined()),
            FormField::text("rating", rating),
            FormField::text("subtype", options.category.clone().unwrap_or_default()),
            FormField::text("folderid", options.folder.clone().unwrap_or_default()),
            FormField::file("submitfile", primary.clone()),
        ];
        if options.critique {
            fields.push(FormField::text("critique", "on"));
        }
        if options.no_notification {
            fields.push(FormField::text("nonotification", "on"));
        }
        if let Some(thumbnail) = data.thumbnail.clone().filter(|_| options.defaults.use_thumbnail) {
            fields.push(FormField::file("thumbfile", thumbnail));
        }

        let response = self
            .client
            .post(token, &self.url(path), &account.id, self.auth(account)?.multipart(fields))
            .await?;

        if response.final_url.contains("/manage/thumbnail") {
            let submit_id = select_attr(&response.body, &SUBMIT_ID, "value").ok_or_else(|| {
                WebsiteError::protocol("Weasyl thumbnail page without submission id", response.body.clone())
            })?;
            let confirm = vec![
                ("token".to_string(), select_attr(&response.body, &FORM_TOKEN, "value").unwrap_or(form_token)),
                ("submitid".to_string(), submit_id),
                ("x1".to_string(), "0".to_string()),
                ("y1".to_string(), "0".to_string()),
                ("x2".to_string(), "0".to_string()),
                ("y2".to_string(), "0".to_string()),
            ];
            let confirmed = self
                .client
                .post(
                    token,
                    &self.url("/manage/thumbnail"),
                    &account.id,
                    self.auth(account)?.form(confirm),
                )
                .await?;
            return Ok(PostResponse::success(self.id(), Some(confirmed.final_url)));
        }

        if response.final_url.contains("/submission") || response.final_url.contains("/~") {
            return Ok(PostResponse::success(self.id(), Some(response.final_url)));
        }

        let message = select_text(&response.body, &ERROR_MESSAGE)
            .unwrap_or_else(|| "Weasyl did not accept the submission".to_string());
        Err(WebsiteError::protocol(message, response.body))
    }
}

#[async_trait]
impl WebsiteAdapter for Weasyl {
    fn id(&self) -> WebsiteId {
        WebsiteId::Weasyl
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn description_pipeline(&self) -> &DescriptionPipeline {
        &self.pipeline
    }

    fn tag_format(&self) -> &TagFormat {
        &self.tags
    }

    fn account_info(&self) -> &AccountInfoStore {
        &self.info
    }

    fn username_shortcuts(&self) -> &[UsernameShortcut] {
        &SHORTCUTS
    }

    fn rating_code(&self, rating: SubmissionRating) -> Option<String> {
        match rating {
            SubmissionRating::General => Some("10".to_string()),
            SubmissionRating::Mature => Some("30".to_string()),
            SubmissionRating::Adult => Some("40".to_string()),
            SubmissionRating::Extreme => None,
        }
    }

    async fn check_login_status(&self, account: &Account) -> LoginResponse {
        match self.load_account(account).await {
            Ok(login) => LoginResponse::logged_in(login),
            Err(e) => {
                debug!(account = %account.id, error = %e, "Weasyl login check failed");
                LoginResponse::logged_out()
            }
        }
    }

    fn scaling_options(&self, file: &FileRecord) -> Option<ScalingOptions> {
        let max_size = match file.file_type {
            FileType::Image => 50 * MB,
            FileType::Audio | FileType::Video => 15 * MB,
            _ => 10 * MB,
        };
        Some(ScalingOptions { max_size })
    }

    fn validate_file_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = files::check_files(self, input);
        check_tags_and_folder(self, input, &mut parts);
        if input.rating.is_none() {
            parts.problem("Weasyl requires a rating.");
        }
        parts
    }

    fn validate_notification_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = ValidationParts::default();
        check_tags_and_folder(self, input, &mut parts);
        parts
    }

    async fn post_file_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let response = retry_once(self.id(), move || self.submit_once(token, data, account)).await?;
        info!(account = %account.id, source = ?response.source, "Posted submission to Weasyl");
        Ok(response)
    }

    async fn post_notification_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let rating = data.rating.unwrap_or(SubmissionRating::General);
        let rating = self
            .rating_code(rating)
            .ok_or_else(|| WebsiteError::InvalidOptions(unsupported_rating(self.id(), rating)))?;
        let form_token = self.form_token(token, "/submit/journal", account).await?;

        let fields = vec![
            FormField::text("token", form_token),
            FormField::text("title", data.title.clone()),
            FormField::text("rating", rating),
            FormField::text("content", data.description.clone()),
            FormField::text("tags", self.format_tags(&data.tags).as_joined()),
        ];
        let response = self
            .client
            .post(
                token,
                &self.url("/submit/journal"),
                &account.id,
                self.auth(account)?.multipart(fields),
            )
            .await?;

        if !response.final_url.contains("/journal") {
            return Err(WebsiteError::protocol(
                "Weasyl did not accept the journal",
                response.body,
            ));
        }
        Ok(PostResponse::success(self.id(), Some(response.final_url)))
    }

    fn transform_account_data(&self, data: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "api_key": data.get("api_key").cloned().unwrap_or_default() })
    }
}

fn check_tags_and_folder(adapter: &Weasyl, input: &ValidationInput, parts: &mut ValidationParts) {
    if adapter.parse_tags(&input.tags).len() < MIN_TAGS {
        parts.problem(format!("Weasyl requires at least {} tags.", MIN_TAGS));
    }

    let Ok(options) = input.options_as::<WeasylOptions>() else {
        return;
    };
    if let (Some(folder), Some(known)) = (
        options.folder.as_deref().filter(|f| !f.is_empty()),
        adapter.info.folders(&input.part.account_id),
    ) {
        if !known.iter().any(|f| f.id == folder) {
            parts.warning(format!(
                "Folder {} was not found; the submission will be posted without a folder.",
                folder
            ));
        }
    }
}
