//! Discord webhooks
//!
//! Accounts are webhook URLs. Files are sent in one multipart request with a
//! `payload_json` field; notifications are a single JSON message.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    account_data, truncate_chars, AccountInfo, AccountInfoStore, Capabilities, WebsiteAdapter,
    WebsiteClient, MB,
};
use crate::accounts::Account;
use crate::cancel::CancellationToken;
use crate::description::{DescriptionParser, DescriptionPipeline};
use crate::error::WebsiteError;
use crate::tags::TagFormat;
use crate::transport::{FormField, RequestOptions, Transport};
use crate::types::{
    DefaultOptions, FilePayload, FileRecord, LoginResponse, PostData, PostResponse,
    ScalingOptions, ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationInput};

/// Attachments per message
pub const MAX_FILES: usize = 10;
/// Characters per message
pub const MAX_MESSAGE_LENGTH: usize = 2000;

#[derive(Debug, Deserialize)]
struct DiscordAccountData {
    webhook: String,
}

#[derive(Debug, Deserialize)]
struct WebhookInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordOptions {
    #[serde(flatten)]
    pub defaults: DefaultOptions,
    /// Prefix attachments with `SPOILER_` so Discord blurs them
    #[serde(default)]
    pub spoiler: bool,
    /// Put the title in bold above the description
    #[serde(default)]
    pub use_title: bool,
}

pub struct Discord {
    client: WebsiteClient,
    capabilities: Capabilities,
    pipeline: DescriptionPipeline,
    tags: TagFormat,
    info: AccountInfoStore,
}

impl Discord {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            client: WebsiteClient::new(WebsiteId::Discord, transport),
            capabilities: Capabilities {
                accepts_additional_files: true,
                max_description_length: Some(MAX_MESSAGE_LENGTH),
                ..Default::default()
            },
            pipeline: DescriptionPipeline::new(DescriptionParser::Markdown),
            tags: TagFormat::default(),
            info: AccountInfoStore::new(),
        }
    }

    fn message(&self, data: &PostData, options: &DiscordOptions) -> String {
        let content = if options.use_title && !data.title.trim().is_empty() {
            format!("**{}**\n\n{}", data.title.trim(), data.description)
        } else {
            data.description.clone()
        };
        truncate_chars(content.trim(), MAX_MESSAGE_LENGTH)
    }

    fn attachments(&self, data: &PostData, options: &DiscordOptions) -> Result<Vec<FilePayload>, WebsiteError> {
        let primary = data
            .primary
            .clone()
            .ok_or_else(|| WebsiteError::InvalidOptions("Submission has no primary file".to_string()))?;

        let mut attachments: Vec<FilePayload> = std::iter::once(primary)
            .chain(data.additional.iter().cloned())
            .take(MAX_FILES)
            .collect();

        if options.spoiler {
            for file in &mut attachments {
                file.file_name = format!("SPOILER_{}", file.file_name);
            }
        }
        Ok(attachments)
    }
}

fn wait_url(webhook: &str) -> String {
    let separator = if webhook.contains('?') { '&' } else { '?' };
    format!("{}{}wait=true", webhook, separator)
}

#[async_trait]
impl WebsiteAdapter for Discord {
    fn id(&self) -> WebsiteId {
        WebsiteId::Discord
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
        let Ok(data) = account_data::<DiscordAccountData>(self.id(), account) else {
            return LoginResponse::logged_out();
        };

        let result = self
            .client
            .read(&data.webhook, &account.id, RequestOptions::new().skip_cookies())
            .await
            .and_then(|response| response.json::<WebhookInfo>());

        match result {
            Ok(response) => {
                let name = response
                    .body
                    .name
                    .or(response.body.channel_id)
                    .unwrap_or_else(|| account.alias.clone());
                self.info.set(&account.id, AccountInfo::Username(name.clone()));
                LoginResponse::logged_in(name)
            }
            Err(e) => {
                debug!(account = %account.id, error = %e, "Discord webhook check failed");
                LoginResponse::logged_out()
            }
        }
    }

    fn scaling_options(&self, _file: &FileRecord) -> Option<ScalingOptions> {
        Some(ScalingOptions { max_size: 25 * MB })
    }

    fn validate_file_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = files::check_files(self, input);
        let additional = input
            .submission
            .additional
            .iter()
            .filter(|f| !f.is_ignored_for(&input.part.account_id))
            .count();
        if additional + 1 > MAX_FILES {
            parts.warning(format!(
                "Discord accepts at most {} files per message; {} will not be posted.",
                MAX_FILES,
                additional + 1 - MAX_FILES
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
        let account_data = account_data::<DiscordAccountData>(self.id(), account)?;
        let options: DiscordOptions = data.options_as()?;

        let payload = serde_json::json!({ "content": self.message(data, &options) });
        let mut fields = vec![FormField::text("payload_json", payload.to_string())];
        for (index, file) in self.attachments(data, &options)?.into_iter().enumerate() {
            fields.push(FormField::file(format!("files[{}]", index), file));
        }

        let response = self
            .client
            .post(
                token,
                &wait_url(&account_data.webhook),
                &account.id,
                RequestOptions::new().skip_cookies().multipart(fields),
            )
            .await?;

        let message = response.json::<serde_json::Value>()?;
        let source = message.body["attachments"][0]["url"]
            .as_str()
            .map(str::to_string);

        info!(account = %account.id, "Posted file to Discord webhook");
        Ok(PostResponse::success(self.id(), source))
    }

    async fn post_notification_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let account_data = account_data::<DiscordAccountData>(self.id(), account)?;
        let options: DiscordOptions = data.options_as()?;

        let body = serde_json::json!({ "content": self.message(data, &options) });
        self.client
            .post(
                token,
                &wait_url(&account_data.webhook),
                &account.id,
                RequestOptions::new().skip_cookies().json_value(body),
            )
            .await?;

        info!(account = %account.id, "Posted message to Discord webhook");
        Ok(PostResponse::success(self.id(), None))
    }

    fn transform_account_data(&self, data: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "webhook": data.get("webhook").cloned().unwrap_or_default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, RequestBody};

    const WEBHOOK: &str = "https://discord.com/api/webhooks/1/abc";

    fn account() -> Account {
        Account::new("hook", WebsiteId::Discord, serde_json::json!({ "webhook": WEBHOOK }))
    }

    fn post_data(options: serde_json::Value) -> PostData {
        PostData {
            submission_id: "s".to_string(),
            account_id: "hook".to_string(),
            title: "Title".to_string(),
            description: "Hello".to_string(),
            tags: Vec::new(),
            rating: None,
            sources: Vec::new(),
            options,
            primary: Some(FilePayload::new("a.png", "image/png", vec![1u8])),
            thumbnail: None,
            additional: vec![FilePayload::new("b.png", "image/png", vec![2u8])],
            fallback: None,
        }
    }

    #[tokio::test]
    async fn test_login_reads_webhook_name() {
        let transport = Arc::new(MockTransport::new().on_get("/webhooks/1/abc", 200, r#"{"name":"Art Bot"}"#));
        let discord = Discord::new(transport);
        let response = discord.check_login_status(&account()).await;
        assert!(response.logged_in);
        assert_eq!(response.username.as_deref(), Some("Art Bot"));
        assert_eq!(discord.account_info().username("hook").as_deref(), Some("Art Bot"));
    }

    #[tokio::test]
    async fn test_login_failure_is_logged_out() {
        let transport = Arc::new(MockTransport::new().on_get("/webhooks/1/abc", 401, "{}"));
        let discord = Discord::new(transport);
        assert!(!discord.check_login_status(&account()).await.logged_in);

        let broken = Account::new("hook", WebsiteId::Discord, serde_json::json!({}));
        assert!(!discord.check_login_status(&broken).await.logged_in);
    }

    #[tokio::test]
    async fn test_post_file_sends_all_attachments() {
        let transport = Arc::new(MockTransport::new().on_post(
            "/webhooks/1/abc?wait=true",
            200,
            r#"{"id":"9","attachments":[{"url":"https://cdn.discordapp.com/a.png"}]}"#,
        ));
        let discord = Discord::new(transport.clone());
        let response = discord
            .post_file_submission(
                &CancellationToken::new(),
                &post_data(serde_json::json!({ "spoiler": true, "use_title": true })),
                &account(),
            )
            .await
            .unwrap();

        assert_eq!(response.source.as_deref(), Some("https://cdn.discordapp.com/a.png"));
        assert_eq!(response.website, WebsiteId::Discord);

        let call = &transport.calls()[0];
        let payload: serde_json::Value = serde_json::from_str(call.options.field("payload_json").unwrap()).unwrap();
        assert_eq!(payload["content"], "**Title**\n\nHello");
        match &call.options.body {
            RequestBody::Multipart(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
                assert_eq!(names, vec!["payload_json", "files[0]", "files[1]"]);
                match &fields[1] {
                    FormField::File { file, .. } => assert_eq!(file.file_name, "SPOILER_a.png"),
                    other => panic!("Expected file field, got {:?}", other),
                }
            }
            other => panic!("Expected multipart body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notification_is_truncated() {
        let transport = Arc::new(MockTransport::new().on_post("/webhooks/1/abc", 200, "{}"));
        let discord = Discord::new(transport.clone());
        let mut data = post_data(serde_json::json!({}));
        data.description = "x".repeat(2500);

        discord
            .post_notification_submission(&CancellationToken::new(), &data, &account())
            .await
            .unwrap();

        match &transport.calls()[0].options.body {
            RequestBody::Json(body) => {
                assert_eq!(body["content"].as_str().unwrap().len(), MAX_MESSAGE_LENGTH)
            }
            other => panic!("Expected JSON body, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_keeps_only_webhook() {
        let discord = Discord::new(Arc::new(MockTransport::new()));
        let data = discord.transform_account_data(serde_json::json!({
            "webhook": WEBHOOK,
            "guild": {"name": "noise"}
        }));
        assert_eq!(data, serde_json::json!({ "webhook": WEBHOOK }));
    }
}
