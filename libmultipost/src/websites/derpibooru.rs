//! Derpibooru
//!
//! Image board driven by tags. The rating is expressed as one of the
//! board's rating tags, appended to the author's tags at post time.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    require_rating_code, select_attr, select_text, AccountInfo, AccountInfoStore, Capabilities,
    WebsiteAdapter, WebsiteClient, MB,
};
use crate::accounts::Account;
use crate::cancel::CancellationToken;
use crate::description::{DescriptionParser, DescriptionPipeline, UsernameShortcut};
use crate::error::WebsiteError;
use crate::tags::{TagFormat, TagJoin, TagParseOptions};
use crate::transport::{FormField, RequestOptions, Transport};
use crate::types::{
    DefaultOptions, FileRecord, LoginResponse, PostData, PostResponse, ScalingOptions,
    SubmissionRating, ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationInput};

pub const BASE_URL: &str = "https://derpibooru.org";
/// Tags required, the rating tag included
pub const MIN_TAGS: usize = 3;

static USER_NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[data-user-name]").unwrap());
static CSRF_TOKEN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="csrf-token"]"#).unwrap());
static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/images/(\d+)").unwrap());
static COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(",").unwrap());
static FORM_ERROR: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".alert.alert-danger").unwrap());

const SHORTCUTS: [UsernameShortcut; 1] = [UsernameShortcut::new(
    "db",
    "https://derpibooru.org/profiles/$1",
)];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DerpibooruOptions {
    #[serde(flatten)]
    pub defaults: DefaultOptions,
    #[serde(default)]
    pub anonymous: bool,
}

pub struct Derpibooru {
    client: WebsiteClient,
    base_url: String,
    capabilities: Capabilities,
    pipeline: DescriptionPipeline,
    tags: TagFormat,
    info: AccountInfoStore,
}

impl Derpibooru {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            client: WebsiteClient::new(WebsiteId::Derpibooru, transport),
            base_url: BASE_URL.to_string(),
            capabilities: Capabilities {
                accepts_files: vec!["png", "jpeg", "jpg", "gif", "svg", "webm", "mp4"],
                accepts_source_urls: true,
                supports_notifications: false,
                ..Default::default()
            },
            pipeline: DescriptionPipeline::new(DescriptionParser::Markdown),
            tags: TagFormat::new(TagJoin::Comma)
                .with_parse(TagParseOptions {
                    space_replacer: " ".to_string(),
                    ..Default::default()
                })
                .with_illegal_chars(COMMA.clone()),
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

    /// Author tags followed by the rating tag
    fn tags_with_rating(&self, tags: &[String], rating_tag: &str) -> Vec<String> {
        let mut tags: Vec<String> = tags
            .iter()
            .filter(|t| !RATING_TAGS.contains(&t.to_lowercase().as_str()))
            .cloned()
            .collect();
        tags.push(rating_tag.to_string());
        tags
    }
}

const RATING_TAGS: [&str; 4] = ["safe", "suggestive", "questionable", "explicit"];

#[async_trait]
impl WebsiteAdapter for Derpibooru {
    fn id(&self) -> WebsiteId {
        WebsiteId::Derpibooru
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
        let tag = match rating {
            SubmissionRating::General => RATING_TAGS[0],
            SubmissionRating::Mature => RATING_TAGS[1],
            SubmissionRating::Adult => RATING_TAGS[2],
            SubmissionRating::Extreme => RATING_TAGS[3],
        };
        Some(tag.to_string())
    }

    async fn check_login_status(&self, account: &Account) -> LoginResponse {
        let page = match self.client.read(&self.url("/"), &account.id, RequestOptions::new()).await {
            Ok(page) => page,
            Err(e) => {
                debug!(account = %account.id, error = %e, "Derpibooru login check failed");
                return LoginResponse::logged_out();
            }
        };

        match select_attr(&page.body, &USER_NAME, "data-user-name") {
            Some(username) => {
                self.info.set(&account.id, AccountInfo::Username(username.clone()));
                LoginResponse::logged_in(username)
            }
            None => LoginResponse::logged_out(),
        }
    }

    fn scaling_options(&self, _file: &FileRecord) -> Option<ScalingOptions> {
        Some(ScalingOptions { max_size: 100 * MB })
    }

    fn validate_file_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = files::check_files(self, input);

        let Some(rating) = input.rating else {
            parts.problem("Derpibooru requires a rating.");
            return parts;
        };
        let rating_tag = self.rating_code(rating).unwrap_or_default();
        let tags = self.tags_with_rating(&self.parse_tags(&input.tags), &rating_tag);
        if tags.len() < MIN_TAGS {
            parts.problem(format!(
                "Derpibooru requires at least {} tags, including the rating.",
                MIN_TAGS
            ));
        }
        parts
    }

    async fn post_file_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let options: DerpibooruOptions = data.options_as()?;
        let rating_tag = require_rating_code(self, data)?;
        let primary = data
            .primary
            .clone()
            .ok_or_else(|| WebsiteError::InvalidOptions("Submission has no primary file".to_string()))?;

        let form = self
            .client
            .get(token, &self.url("/images/new"), &account.id, RequestOptions::new())
            .await?;
        let csrf = select_attr(&form.body, &CSRF_TOKEN, "content")
            .ok_or_else(|| WebsiteError::protocol("Derpibooru csrf token not found", form.body.clone()))?;

        let tags = self
            .format_tags(&self.tags_with_rating(&data.tags, &rating_tag))
            .as_joined();
        let fields = vec![
            FormField::text("_csrf_token", csrf),
            FormField::text("image[tag_input]", tags),
            FormField::text("image[description]", data.description.clone()),
            FormField::text(
                "image[source_url]",
                data.sources.first().cloned().unwrap_or_default(),
            ),
            FormField::text("image[anonymous]", if options.anonymous { "true" } else { "false" }),
            FormField::file("image[image]", primary),
        ];

        let response = self
            .client
            .post(token, &self.url("/images"), &account.id, RequestOptions::new().multipart(fields))
            .await?;

        if !IMAGE_URL.is_match(&response.final_url) {
            let message = select_text(&response.body, &FORM_ERROR)
                .unwrap_or_else(|| "Derpibooru did not accept the image".to_string());
            return Err(WebsiteError::protocol(message, response.body));
        }

        info!(account = %account.id, url = %response.final_url, "Posted image to Derpibooru");
        Ok(PostResponse::success(self.id(), Some(response.final_url)))
    }

    fn transform_account_data(&self, _data: serde_json::Value) -> serde_json::Value {
        serde_json::json!({})
    }
}
