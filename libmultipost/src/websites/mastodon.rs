//! Mastodon
//!
//! OAuth bearer tokens with an optional expiry. An expired token is refreshed
//! through the instance's token endpoint before any authenticated call; the
//! refreshed token is cached in the account information store and handed
//! back to the caller through [`LoginResponse::data`] so it can be persisted.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    account_data, truncate_chars, AccessToken, AccountInfo, AccountInfoStore, Capabilities,
    WebsiteAdapter, WebsiteClient, MB,
};
use crate::accounts::Account;
use crate::cancel::CancellationToken;
use crate::description::{DescriptionParser, DescriptionPipeline};
use crate::error::WebsiteError;
use crate::tags::{TagFormat, TagJoin};
use crate::transport::{FormField, RequestOptions, Transport};
use crate::types::{
    DefaultOptions, FilePayload, FileRecord, FileType, LoginResponse, PostData, PostResponse,
    ScalingOptions, SubmissionRating, ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationInput};

/// Characters per status
pub const MAX_STATUS_LENGTH: usize = 500;
/// Media attachments per status
pub const MAX_MEDIA: usize = 4;
/// Refresh tokens this close to their expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

static HASHTAG_ILLEGAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}_]").unwrap());

struct MastodonAccountData {
    instance: String,
    client_id: String,
    client_secret: SecretString,
    token: AccessToken,
}

impl<'de> Deserialize<'de> for MastodonAccountData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            instance: String,
            client_id: String,
            client_secret: String,
            access_token: String,
            #[serde(default)]
            refresh_token: Option<String>,
            #[serde(default)]
            expires_at: Option<DateTime<Utc>>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            instance: raw.instance.trim_end_matches('/').to_string(),
            client_id: raw.client_id,
            client_secret: SecretString::from(raw.client_secret),
            token: AccessToken {
                access_token: SecretString::from(raw.access_token),
                refresh_token: raw.refresh_token.map(SecretString::from),
                expires_at: raw.expires_at,
            },
        })
    }
}

impl MastodonAccountData {
    /// Persistable login data carrying `token`
    fn to_value(&self, token: &AccessToken) -> serde_json::Value {
        serde_json::json!({
            "instance": self.instance,
            "client_id": self.client_id,
            "client_secret": self.client_secret.expose_secret(),
            "access_token": token.bearer(),
            "refresh_token": token.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
            "expires_at": token.expires_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    acct: String,
}

#[derive(Debug, Deserialize)]
struct MediaAttachment {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewStatus {
    status: String,
    media_ids: Vec<String>,
    sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    spoiler_text: Option<String>,
    visibility: String,
}

fn default_visibility() -> String {
    "public".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonOptions {
    #[serde(flatten)]
    pub defaults: DefaultOptions,
    /// `public`, `unlisted`, `private` or `direct`
    #[serde(default = "default_visibility")]
    pub visibility: String,
    /// Content warning shown in front of the status
    #[serde(default)]
    pub spoiler_text: Option<String>,
    /// Alt text for every attachment; the title when unset
    #[serde(default)]
    pub alt_text: Option<String>,
}

pub struct Mastodon {
    client: WebsiteClient,
    capabilities: Capabilities,
    pipeline: DescriptionPipeline,
    tags: TagFormat,
    info: AccountInfoStore,
}

impl Mastodon {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            client: WebsiteClient::new(WebsiteId::Mastodon, transport),
            capabilities: Capabilities {
                accepts_files: vec!["image/*", "video/*", "audio/*"],
                accepts_additional_files: true,
                refresh_before_post: true,
                max_description_length: Some(MAX_STATUS_LENGTH),
                ..Default::default()
            },
            pipeline: DescriptionPipeline::new(DescriptionParser::Plaintext),
            tags: TagFormat::new(TagJoin::Hashtags)
                .with_illegal_chars(HASHTAG_ILLEGAL.clone())
                .with_max_joined_length(MAX_STATUS_LENGTH / 2),
            info: AccountInfoStore::new(),
        }
    }

    /// A usable access token, refreshing it when it is about to expire
    ///
    /// Returns the token and whether it was refreshed.
    async fn access_token(
        &self,
        token: &CancellationToken,
        data: &MastodonAccountData,
        account: &Account,
    ) -> Result<(AccessToken, bool), WebsiteError> {
        let current = self
            .info
            .token(&account.id)
            .unwrap_or_else(|| data.token.clone());

        if !current.is_expired(Utc::now(), EXPIRY_MARGIN_SECS) {
            return Ok((current, false));
        }

        let Some(refresh_token) = current.refresh_token.as_ref() else {
            return Err(WebsiteError::Authentication(format!(
                "Mastodon token for {} expired and cannot be refreshed",
                account.id
            )));
        };

        debug!(account = %account.id, "Refreshing Mastodon access token");
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.expose_secret().to_string()),
            ("client_id".to_string(), data.client_id.clone()),
            ("client_secret".to_string(), data.client_secret.expose_secret().to_string()),
        ];
        let response = self
            .client
            .post(
                token,
                &format!("{}/oauth/token", data.instance),
                &account.id,
                RequestOptions::new().skip_cookies().form(form),
            )
            .await
            .map_err(|e| match e {
                WebsiteError::Cancelled => e,
                e => WebsiteError::Authentication(format!("Mastodon token refresh failed: {}", e)),
            })?
            .json::<TokenResponse>()?;

        let refreshed = AccessToken {
            access_token: SecretString::from(response.body.access_token),
            refresh_token: response
                .body
                .refresh_token
                .map(SecretString::from)
                .or_else(|| current.refresh_token.clone()),
            expires_at: response
                .body
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        };
        self.info.set(&account.id, AccountInfo::Token(refreshed.clone()));
        Ok((refreshed, true))
    }

    async fn upload_media(
        &self,
        token: &CancellationToken,
        instance: &str,
        bearer: &str,
        account: &Account,
        file: FilePayload,
        alt_text: &str,
    ) -> Result<String, WebsiteError> {
        let fields = vec![
            FormField::file("file", file),
            FormField::text("description", alt_text),
        ];
        let response = self
            .client
            .post(
                token,
                &format!("{}/api/v2/media", instance),
                &account.id,
                RequestOptions::new().skip_cookies().bearer(bearer).multipart(fields),
            )
            .await?
            .json::<MediaAttachment>()?;
        Ok(response.body.id)
    }

    async fn publish(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
        with_media: bool,
    ) -> Result<PostResponse, WebsiteError> {
        let account_data = account_data::<MastodonAccountData>(self.id(), account)?;
        let options: MastodonOptions = data.options_as()?;
        let (access, _) = self.access_token(token, &account_data, account).await?;

        let mut media_ids = Vec::new();
        if with_media {
            let alt_text = options.alt_text.clone().unwrap_or_else(|| data.title.clone());
            let files = data
                .primary
                .iter()
                .chain(data.additional.iter())
                .take(MAX_MEDIA)
                .cloned();
            for file in files {
                let id = self
                    .upload_media(token, &account_data.instance, access.bearer(), account, file, &alt_text)
                    .await?;
                media_ids.push(id);
            }
        }

        let status = NewStatus {
            status: compose_status(&data.description, &self.format_tags(&data.tags).as_joined()),
            media_ids,
            sensitive: data.rating.is_some_and(|r| r != SubmissionRating::General),
            spoiler_text: options.spoiler_text.filter(|s| !s.trim().is_empty()),
            visibility: options.visibility,
        };

        let response = self
            .client
            .post(
                token,
                &format!("{}/api/v1/statuses", account_data.instance),
                &account.id,
                RequestOptions::new()
                    .skip_cookies()
                    .bearer(access.bearer())
                    .json(&status)?,
            )
            .await?
            .json::<Status>()?;

        info!(account = %account.id, "Posted status to Mastodon");
        Ok(PostResponse::success(self.id(), response.body.url))
    }
}

/// Description followed by hashtags, cut to the status limit
///
/// The description is shortened first so the hashtags survive.
fn compose_status(description: &str, hashtags: &str) -> String {
    let description = description.trim();
    if hashtags.is_empty() {
        return truncate_chars(description, MAX_STATUS_LENGTH);
    }
    if description.is_empty() {
        return truncate_chars(hashtags, MAX_STATUS_LENGTH);
    }

    let room = MAX_STATUS_LENGTH.saturating_sub(hashtags.chars().count() + 2);
    let status = format!("{}\n\n{}", truncate_chars(description, room).trim_end(), hashtags);
    truncate_chars(&status, MAX_STATUS_LENGTH)
}

#[async_trait]
impl WebsiteAdapter for Mastodon {
    fn id(&self) -> WebsiteId {
        WebsiteId::Mastodon
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

    async fn check_login_status(&self, account: &Account) -> LoginResponse {
        let Ok(data) = account_data::<MastodonAccountData>(self.id(), account) else {
            return LoginResponse::logged_out();
        };

        let token = CancellationToken::new();
        let (access, refreshed) = match self.access_token(&token, &data, account).await {
            Ok(access) => access,
            Err(e) => {
                debug!(account = %account.id, error = %e, "Mastodon token unusable");
                return LoginResponse::logged_out();
            }
        };

        let result = self
            .client
            .read(
                &format!("{}/api/v1/accounts/verify_credentials", data.instance),
                &account.id,
                RequestOptions::new().skip_cookies().bearer(access.bearer()),
            )
            .await
            .and_then(|response| response.json::<Credentials>());

        match result {
            Ok(credentials) => {
                let username = credentials.body.acct;
                self.info.set(&account.id, AccountInfo::Username(username.clone()));
                let mut response = LoginResponse::logged_in(username);
                if refreshed {
                    response.data = Some(data.to_value(&access));
                }
                response
            }
            Err(e) => {
                debug!(account = %account.id, error = %e, "Mastodon credential check failed");
                LoginResponse::logged_out()
            }
        }
    }

    fn scaling_options(&self, file: &FileRecord) -> Option<ScalingOptions> {
        let max_size = match file.file_type {
            FileType::Image => 16 * MB,
            _ => 99 * MB,
        };
        Some(ScalingOptions { max_size })
    }

    fn validate_file_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = files::check_files(self, input);
        let additional = input
            .submission
            .additional
            .iter()
            .filter(|f| !f.is_ignored_for(&input.part.account_id))
            .count();
        if additional + 1 > MAX_MEDIA {
            parts.warning(format!(
                "Mastodon accepts at most {} attachments; {} will not be posted.",
                MAX_MEDIA,
                additional + 1 - MAX_MEDIA
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
        if data.primary.is_none() {
            return Err(WebsiteError::InvalidOptions("Submission has no primary file".to_string()));
        }
        self.publish(token, data, account, true).await
    }

    async fn post_notification_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        self.publish(token, data, account, false).await
    }

    fn transform_account_data(&self, data: serde_json::Value) -> serde_json::Value {
        const KEPT: [&str; 6] = [
            "instance",
            "client_id",
            "client_secret",
            "access_token",
            "refresh_token",
            "expires_at",
        ];
        let kept = KEPT
            .iter()
            .filter_map(|key| data.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(kept)
    }
}
