//! Fur Affinity
//!
//! Session cookies captured by the login window. Posting is a three step
//! form flow: fetch the upload key, upload the file, finalize the details.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    require_rating_code, retry_once, select_attr, select_options, select_text, AccountInfo,
    AccountInfoStore, Capabilities, Folder, WebsiteAdapter, WebsiteClient, MB,
};
use crate::accounts::Account;
use crate::cancel::CancellationToken;
use crate::description::{
    expand_shortcuts, DescriptionParser, DescriptionPipeline, Rewrite, UsernameShortcut,
};
use crate::error::WebsiteError;
use crate::tags::{TagFormat, TagJoin};
use crate::transport::{FormField, RequestOptions, Transport};
use crate::types::{
    DefaultOptions, FileRecord, FileType, LoginResponse, PostData, PostResponse, ScalingOptions,
    SubmissionRating, ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationInput};

pub const BASE_URL: &str = "https://www.furaffinity.net";
pub const MAX_KEYWORDS_LENGTH: usize = 250;

static USERNAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#my-username").unwrap());
static FORM_KEY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="key"]"#).unwrap());
static FOLDER_OPTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("option[value]").unwrap());
static NOTICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".notice-message").unwrap());
static ILLEGAL_KEYWORD_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}_\-]").unwrap());
static HR_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[hr\]").unwrap());

const SHORTCUTS: [UsernameShortcut; 1] = [UsernameShortcut::new(
    "fa",
    "https://www.furaffinity.net/user/$1",
)];

#[derive(Debug, Clone, Deserialize)]
pub struct FurAffinityOptions {
    #[serde(flatten)]
    pub defaults: DefaultOptions,
    #[serde(default = "default_one")]
    pub category: String,
    #[serde(default = "default_one")]
    pub theme: String,
    #[serde(default = "default_one")]
    pub species: String,
    #[serde(default = "default_zero")]
    pub gender: String,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub scraps: bool,
    #[serde(default)]
    pub disable_comments: bool,
}

fn default_one() -> String {
    "1".to_string()
}

fn default_zero() -> String {
    "0".to_string()
}

pub struct FurAffinity {
    client: WebsiteClient,
    base_url: String,
    capabilities: Capabilities,
    pipeline: DescriptionPipeline,
    tags: TagFormat,
    info: AccountInfoStore,
}

impl FurAffinity {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            client: WebsiteClient::new(WebsiteId::FurAffinity, transport),
            base_url: BASE_URL.to_string(),
            capabilities: Capabilities {
                accepts_files: vec![
                    "jpg", "jpeg", "png", "gif", "webp", "swf", "doc", "docx", "rtf", "txt",
                    "pdf", "odt", "mid", "wav", "mp3", "mpeg", "mpg",
                ],
                wait_between_posts: Duration::from_secs(70),
                ..Default::default()
            },
            pipeline: DescriptionPipeline::new(DescriptionParser::BBCode)
                .with_rewrite(Rewrite::from_regex(&HR_TAG, "-----")),
            tags: TagFormat::new(TagJoin::Space)
                .with_max_joined_length(MAX_KEYWORDS_LENGTH)
                .with_illegal_chars(ILLEGAL_KEYWORD_CHARS.clone()),
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

    async fn load_account(&self, account: &Account) -> Result<Option<String>, WebsiteError> {
        let page = self
            .client
            .read(&self.url("/controls/submissions/"), &account.id, RequestOptions::new())
            .await?;
        let Some(username) = select_text(&page.body, &USERNAME)
            .map(|name| name.trim_start_matches('~').to_string())
            .filter(|name| !name.is_empty())
        else {
            return Ok(None);
        };

        let folders_page = self
            .client
            .read(&self.url("/controls/folders/submissions/"), &account.id, RequestOptions::new())
            .await?;
        let folders = select_options(&folders_page.body, &FOLDER_OPTION)
            .into_iter()
            .filter(|(id, _)| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .map(|(id, name)| Folder { id, name })
            .collect();

        self.info.set(&account.id, AccountInfo::Folders(folders));
        self.info.set(&account.id, AccountInfo::Username(username.clone()));
        Ok(Some(username))
    }

    async fn form_key(&self, token: &CancellationToken, path: &str, account: &Account) -> Result<String, WebsiteError> {
        let page = self
            .client
            .get(token, &self.url(path), &account.id, RequestOptions::new())
            .await?;
        select_attr(&page.body, &FORM_KEY, "value")
            .ok_or_else(|| WebsiteError::protocol("Fur Affinity form key not found", page.body))
    }

    async fn submit_once(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let options: FurAffinityOptions = data.options_as()?;
        let rating = require_rating_code(self, data)?;
        let primary = data
            .primary
            .clone()
            .ok_or_else(|| WebsiteError::InvalidOptions("Submission has no primary file".to_string()))?;

        let submission_type = match primary.file_type {
            FileType::Text => "story",
            FileType::Audio => "music",
            _ if primary.mimetype.contains("flash") => "flash",
            _ => "submission",
        };

        let key = self.form_key(token, "/submit/", account).await?;

        let mut upload = vec![
            FormField::text("key", key),
            FormField::text("submission_type", submission_type),
            FormField::file("submission", primary),
        ];
        if let Some(thumbnail) = data.thumbnail.clone().filter(|_| options.defaults.use_thumbnail) {
            upload.push(FormField::file("thumbnail", thumbnail));
        }
        let uploaded = self
            .client
            .post(token, &self.url("/submit/upload"), &account.id, RequestOptions::new().multipart(upload))
            .await?;
        let finalize_key = select_attr(&uploaded.body, &FORM_KEY, "value").ok_or_else(|| {
            let message = select_text(&uploaded.body, &NOTICE)
                .unwrap_or_else(|| "Fur Affinity rejected the upload".to_string());
            WebsiteError::protocol(message.trim(), uploaded.body.clone())
        })?;

        let mut details = vec![
            FormField::text("key", finalize_key),
            FormField::text("title", data.title.clone()),
            FormField::text("message", data.description.clone()),
            FormField::text("keywords", self.format_tags(&data.tags).as_joined()),
            FormField::text("rating", rating),
            FormField::text("cat", options.category.clone()),
            FormField::text("atype", options.theme.clone()),
            FormField::text("species", options.species.clone()),
            FormField::text("gender", options.gender.clone()),
        ];
        for folder in &options.folders {
            details.push(FormField::text("folder_ids[]", folder.clone()));
        }
        if options.scraps {
            details.push(FormField::text("scrap", "1"));
        }
        if options.disable_comments {
            details.push(FormField::text("lock_comments", "on"));
        }

        let finalized = self
            .client
            .post(token, &self.url("/submit/finalize"), &account.id, RequestOptions::new().multipart(details))
            .await?;

        if !finalized.final_url.contains("/view/") {
            let message = select_text(&finalized.body, &NOTICE)
                .unwrap_or_else(|| "Fur Affinity did not publish the submission".to_string());
            return Err(WebsiteError::protocol(message.trim(), finalized.body));
        }

        Ok(PostResponse::success(self.id(), Some(finalized.final_url)))
    }
}

#[async_trait]
impl WebsiteAdapter for FurAffinity {
    fn id(&self) -> WebsiteId {
        WebsiteId::FurAffinity
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
            SubmissionRating::General => Some("0".to_string()),
            SubmissionRating::Adult => Some("1".to_string()),
            SubmissionRating::Mature => Some("2".to_string()),
            SubmissionRating::Extreme => None,
        }
    }

    async fn check_login_status(&self, account: &Account) -> LoginResponse {
        match self.load_account(account).await {
            Ok(Some(username)) => LoginResponse::logged_in(username),
            Ok(None) => LoginResponse::logged_out(),
            Err(e) => {
                debug!(account = %account.id, error = %e, "Fur Affinity login check failed");
                LoginResponse::logged_out()
            }
        }
    }

    /// Renders `{fa:name}` as the site's own `:iconname:` tag
    fn preparse_description(&self, text: &str) -> String {
        expand_shortcuts(text, &SHORTCUTS, |_, name| format!(":icon{}:", name))
    }

    fn scaling_options(&self, _file: &FileRecord) -> Option<ScalingOptions> {
        Some(ScalingOptions { max_size: 10 * MB })
    }

    fn validate_file_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = files::check_files(self, input);

        if input.rating.is_none() {
            parts.problem("Fur Affinity requires a rating.");
        }

        if let (Ok(options), Some(known)) = (
            input.options_as::<FurAffinityOptions>(),
            self.info.folders(&input.part.account_id),
        ) {
            for folder in options.folders.iter().filter(|f| !known.iter().any(|k| &k.id == *f)) {
                parts.warning(format!("Folder {} was not found on Fur Affinity.", folder));
            }
        }
        parts
    }

    async fn post_file_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let response = retry_once(self.id(), move || self.submit_once(token, data, account)).await?;
        info!(account = %account.id, source = ?response.source, "Posted submission to Fur Affinity");
        Ok(response)
    }

    async fn post_notification_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let key = self.form_key(token, "/controls/journal/", account).await?;
        let form = vec![
            ("key".to_string(), key),
            ("id".to_string(), "0".to_string()),
            ("subject".to_string(), data.title.clone()),
            ("message".to_string(), data.description.clone()),
            ("submit".to_string(), "Create / Update Journal".to_string()),
        ];
        let response = self
            .client
            .post(token, &self.url("/controls/journal/"), &account.id, RequestOptions::new().form(form))
            .await?;

        if !response.final_url.contains("/journal/") {
            return Err(WebsiteError::protocol(
                "Fur Affinity did not publish the journal",
                response.body,
            ));
        }
        Ok(PostResponse::success(self.id(), Some(response.final_url)))
    }

    /// Sessions live in the cookie jar; nothing in the data needs keeping
    fn transform_account_data(&self, data: serde_json::Value) -> serde_json::Value {
        match data.get("username") {
            Some(username) => serde_json::json!({ "username": username }),
            None => serde_json::json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilePayload;
    use crate::transport::MockTransport;
    use pretty_assertions::assert_eq;

    fn account() -> Account {
        Account::new("fa", WebsiteId::FurAffinity, serde_json::Value::Null)
    }

    #[test]
    fn test_description_pipeline() {
        let fa = FurAffinity::new(Arc::new(MockTransport::new()));
        assert_eq!(
            fa.parse_description("<p>By {fa:bob} and {ws:amy}</p><hr><p>x</p>"),
            "By :iconbob: and {ws:amy}\n\n-----\nx"
        );
    }

    #[test]
    fn test_keywords_are_capped() {
        let fa = FurAffinity::new(Arc::new(MockTransport::new()));
        let tags: Vec<String> = (0..100).map(|i| format!("tag{:03}", i)).collect();
        let joined = fa.format_tags(&tags).as_joined();
        assert!(joined.len() <= MAX_KEYWORDS_LENGTH);
        assert!(joined.starts_with("tag000 tag001"));
    }

    #[tokio::test]
    async fn test_login_reads_marker_and_folders() {
        let transport = Arc::new(
            MockTransport::new()
                .on_get(
                    "/controls/submissions/",
                    200,
                    r#"<a id="my-username" href="/user/fox/">~fox</a>"#,
                )
                .on_get(
                    "/controls/folders/submissions/",
                    200,
                    r#"<select><option value="5">Comics</option></select>"#,
                ),
        );
        let fa = FurAffinity::new(transport);
        let response = fa.check_login_status(&account()).await;
        assert_eq!(response.username.as_deref(), Some("fox"));
        assert_eq!(fa.account_info().folders("fa").unwrap()[0].name, "Comics");
    }

    #[tokio::test]
    async fn test_login_without_marker_is_logged_out() {
        let transport = Arc::new(MockTransport::new().on_get("/controls/submissions/", 200, "<html>login</html>"));
        let fa = FurAffinity::new(transport.clone());
        assert!(!fa.check_login_status(&account()).await.logged_in);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_three_step_post() {
        let transport = Arc::new(
            MockTransport::new()
                .on_get("/submit/", 200, r#"<input name="key" value="k1">"#)
                .on_post("/submit/upload", 200, r#"<input name="key" value="k2">"#)
                .on_post_redirect("/submit/finalize", "", "https://www.furaffinity.net/view/123/"),
        );
        let fa = FurAffinity::new(transport.clone());
        let data = PostData {
            submission_id: "s".to_string(),
            account_id: "fa".to_string(),
            title: "Fox".to_string(),
            description: "desc".to_string(),
            tags: vec!["fox".to_string(), "red_panda".to_string()],
            rating: Some(SubmissionRating::Mature),
            sources: Vec::new(),
            options: serde_json::json!({ "folders": ["5"] }),
            primary: Some(FilePayload::new("fox.png", "image/png", vec![1u8])),
            thumbnail: None,
            additional: Vec::new(),
            fallback: None,
        };

        let response = fa
            .post_file_submission(&CancellationToken::new(), &data, &account())
            .await
            .unwrap();
        assert_eq!(response.source.as_deref(), Some("https://www.furaffinity.net/view/123/"));

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].options.field("key"), Some("k1"));
        assert_eq!(calls[2].options.field("key"), Some("k2"));
        assert_eq!(calls[2].options.field("rating"), Some("2"));
        assert_eq!(calls[2].options.field("keywords"), Some("fox red_panda"));
        assert_eq!(calls[2].options.field("folder_ids[]"), Some("5"));
    }

    #[tokio::test]
    async fn test_rejected_upload_reports_notice() {
        let transport = Arc::new(
            MockTransport::new()
                .on_get("/submit/", 200, r#"<input name="key" value="k1">"#)
                .on_post(
                    "/submit/upload",
                    200,
                    r#"<section class="notice-message"><p>File is too <b>large</b>.</p></section>"#,
                ),
        );
        let fa = FurAffinity::new(transport);
        let data = PostData {
            submission_id: "s".to_string(),
            account_id: "fa".to_string(),
            title: "Fox".to_string(),
            description: String::new(),
            tags: Vec::new(),
            rating: Some(SubmissionRating::General),
            sources: Vec::new(),
            options: serde_json::json!({}),
            primary: Some(FilePayload::new("fox.png", "image/png", vec![1u8])),
            thumbnail: None,
            additional: Vec::new(),
            fallback: None,
        };

        let err = fa
            .post_file_submission(&CancellationToken::new(), &data, &account())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File is too large.");
    }
}
