//! Patreon
//!
//! Session cookies plus a CSRF signature scraped from the post editor.
//! A post is created as a draft, receives its media, then is published with
//! its access rules. Tiers discovered at login drive the access validation.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    capture, AccountInfo, AccountInfoStore, Capabilities, Tier, WebsiteAdapter, WebsiteClient, MB,
};
use crate::accounts::Account;
use crate::cancel::CancellationToken;
use crate::description::{DescriptionParser, DescriptionPipeline, Rewrite};
use crate::error::WebsiteError;
use crate::tags::{FormattedTags, TagFormat, TagJoin, TagParseOptions};
use crate::transport::{FormField, RequestOptions, Transport};
use crate::types::{
    DefaultOptions, FileRecord, LoginResponse, PostData, PostResponse, ScalingOptions,
    ValidationParts, WebsiteId,
};
use crate::validation::{files, ValidationInput};

pub const BASE_URL: &str = "https://www.patreon.com";
pub const CSRF_HEADER: &str = "X-CSRF-Signature";
pub const MAX_TAGS: usize = 50;
/// Access rule open to everyone
pub const PUBLIC_TIER: &str = "public";
/// Access rule open to every paying patron
pub const PATRONS_TIER: &str = "patrons";

static CSRF_SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""csrfSignature"\s*:\s*"([^"]+)""#).unwrap());
static HR_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<hr\s*/?>").unwrap());

#[derive(Debug, Deserialize)]
struct Document<T> {
    data: T,
    #[serde(default)]
    included: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatreonOptions {
    #[serde(flatten)]
    pub defaults: DefaultOptions,
    /// Tier ids allowed to see the post, or `public` / `patrons`
    #[serde(default)]
    pub tiers: Vec<String>,
    /// Charge patrons per post on pay-per-post campaigns
    #[serde(default)]
    pub charge_patrons: bool,
    /// Preview shown to people without access
    #[serde(default)]
    pub teaser: Option<String>,
}

pub struct Patreon {
    client: WebsiteClient,
    base_url: String,
    capabilities: Capabilities,
    pipeline: DescriptionPipeline,
    tags: TagFormat,
    info: AccountInfoStore,
}

impl Patreon {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            client: WebsiteClient::new(WebsiteId::Patreon, transport),
            base_url: BASE_URL.to_string(),
            capabilities: Capabilities {
                wait_between_posts: std::time::Duration::from_secs(10),
                ..Default::default()
            },
            pipeline: DescriptionPipeline::new(DescriptionParser::Html)
                .with_rewrite(Rewrite::from_regex(&HR_TAG, "<p>----------</p>")),
            tags: TagFormat::new(TagJoin::Structured)
                .with_parse(TagParseOptions {
                    space_replacer: " ".to_string(),
                    ..Default::default()
                })
                .with_max_count(MAX_TAGS),
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

    async fn csrf(&self, token: &CancellationToken, account: &Account) -> Result<String, WebsiteError> {
        let editor = self
            .client
            .get(token, &self.url("/posts/new"), &account.id, RequestOptions::new())
            .await?;
        capture(&CSRF_SIGNATURE, &editor.body)
            .ok_or_else(|| WebsiteError::protocol("Patreon csrf signature not found", editor.body))
    }

    async fn create_draft(
        &self,
        token: &CancellationToken,
        account: &Account,
        csrf: &str,
        post_type: &str,
    ) -> Result<String, WebsiteError> {
        let body = serde_json::json!({
            "data": { "type": "post", "attributes": { "post_type": post_type } }
        });
        let response = self
            .client
            .post(
                token,
                &self.url("/api/posts"),
                &account.id,
                RequestOptions::new().header(CSRF_HEADER, csrf).json_value(body),
            )
            .await?;
        let draft = response.json::<Document<Resource>>()?;
        let post_id = draft.body.data.id.trim();
        if post_id.is_empty() {
            return Err(WebsiteError::protocol("Patreon did not return a post id", response.body));
        }
        Ok(post_id.to_string())
    }

    async fn upload(
        &self,
        token: &CancellationToken,
        account: &Account,
        csrf: &str,
        post_id: &str,
        data: &PostData,
    ) -> Result<(), WebsiteError> {
        let files = data
            .primary
            .iter()
            .chain(data.additional.iter())
            .cloned();

        for file in files {
            let fields = vec![
                FormField::text("relationship_type", "post"),
                FormField::text("relationship_id", post_id),
                FormField::file("file", file),
            ];
            self.client
                .post(
                    token,
                    &self.url("/api/media"),
                    &account.id,
                    RequestOptions::new().header(CSRF_HEADER, csrf).multipart(fields),
                )
                .await?;
        }
        Ok(())
    }

    async fn publish(
        &self,
        token: &CancellationToken,
        account: &Account,
        csrf: &str,
        post_id: &str,
        data: &PostData,
    ) -> Result<PostResponse, WebsiteError> {
        let options: PatreonOptions = data.options_as()?;
        if options.tiers.is_empty() {
            return Err(WebsiteError::InvalidOptions(MISSING_TIER.to_string()));
        }

        let tags = match self.format_tags(&data.tags) {
            FormattedTags::Structured(tags) => tags,
            FormattedTags::Joined(joined) => vec![joined],
        };
        let body = serde_json::json!({
            "data": {
                "type": "post",
                "attributes": {
                    "title": data.title,
                    "content": data.description,
                    "teaser_text": options.teaser.unwrap_or_default(),
                    "is_paid": options.charge_patrons,
                    "post_type": if data.primary.is_some() { "image_file" } else { "text_only" },
                },
                "relationships": {
                    "access_rules": {
                        "data": options.tiers.iter().map(|tier| access_rule(tier)).collect::<Vec<_>>()
                    },
                    "user_defined_tags": {
                        "data": tags.iter().map(|tag| serde_json::json!({
                            "type": "post_tag",
                            "id": format!("user_defined;{}", tag),
                        })).collect::<Vec<_>>()
                    }
                }
            }
        });

        let response = self
            .client
            .post(
                token,
                &self.url(&format!("/api/posts/{}", post_id)),
                &account.id,
                RequestOptions::new().header(CSRF_HEADER, csrf).json_value(body),
            )
            .await?
            .json::<Document<Resource>>()?;

        let source = response.body.data.attributes["patreon_url"]
            .as_str()
            .map(|path| self.url(path));
        info!(account = %account.id, post = %post_id, "Published Patreon post");
        Ok(PostResponse::success(self.id(), source))
    }
}

pub const MISSING_TIER: &str = "Patreon requires at least one access tier.";

fn access_rule(tier: &str) -> serde_json::Value {
    match tier {
        PUBLIC_TIER => serde_json::json!({ "type": "access-rule", "attributes": { "access_rule_type": "public" } }),
        PATRONS_TIER => serde_json::json!({ "type": "access-rule", "attributes": { "access_rule_type": "patrons" } }),
        id => serde_json::json!({ "type": "access-rule", "attributes": { "access_rule_type": "tier" }, "relationships": { "tier": { "data": { "type": "reward", "id": id } } } }),
    }
}

fn tiers_from(included: &[Resource]) -> Vec<Tier> {
    let mut tiers = vec![
        Tier {
            id: PUBLIC_TIER.to_string(),
            title: "Everyone".to_string(),
            amount_cents: None,
        },
        Tier {
            id: PATRONS_TIER.to_string(),
            title: "All patrons".to_string(),
            amount_cents: None,
        },
    ];
    tiers.extend(included.iter().filter(|r| r.kind == "reward").map(|r| Tier {
        id: r.id.clone(),
        title: r.attributes["title"].as_str().unwrap_or_default().to_string(),
        amount_cents: r.attributes["amount_cents"].as_u64(),
    }));
    tiers
}

#[async_trait]
impl WebsiteAdapter for Patreon {
    fn id(&self) -> WebsiteId {
        WebsiteId::Patreon
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
        let result = self
            .client
            .read(
                &self.url("/api/current_user?include=campaign.tiers"),
                &account.id,
                RequestOptions::new(),
            )
            .await
            .and_then(|response| response.json::<Document<Resource>>());

        match result {
            Ok(response) => {
                let user = response.body.data;
                let username = user.attributes["full_name"]
                    .as_str()
                    .or_else(|| user.attributes["vanity"].as_str())
                    .unwrap_or(user.id.as_str())
                    .to_string();
                self.info.set(&account.id, AccountInfo::Username(username.clone()));
                self.info
                    .set(&account.id, AccountInfo::Tiers(tiers_from(&response.body.included)));
                LoginResponse::logged_in(username)
            }
            Err(e) => {
                debug!(account = %account.id, error = %e, "Patreon login check failed");
                LoginResponse::logged_out()
            }
        }
    }

    fn scaling_options(&self, _file: &FileRecord) -> Option<ScalingOptions> {
        Some(ScalingOptions { max_size: 200 * MB })
    }

    fn validate_file_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = files::check_files(self, input);
        parts.merge(self.validate_notification_submission(input));
        parts
    }

    fn validate_notification_submission(&self, input: &ValidationInput) -> ValidationParts {
        let mut parts = ValidationParts::default();
        let options: PatreonOptions = match input.options_as() {
            Ok(options) => options,
            Err(e) => {
                parts.problem(e.to_string());
                return parts;
            }
        };

        if options.tiers.is_empty() {
            parts.problem(MISSING_TIER);
            return parts;
        }

        if let Some(known) = self.info.tiers(&input.part.account_id) {
            for tier in options.tiers.iter().filter(|t| !known.iter().any(|k| &k.id == *t)) {
                parts.warning(format!("Patreon tier {} was not found on the account.", tier));
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
        if data.primary.is_none() {
            return Err(WebsiteError::InvalidOptions("Submission has no primary file".to_string()));
        }
        let csrf = self.csrf(token, account).await?;
        let post_id = self.create_draft(token, account, &csrf, "image_file").await?;
        self.upload(token, account, &csrf, &post_id, data).await?;
        self.publish(token, account, &csrf, &post_id, data).await
    }

    async fn post_notification_submission(
        &self,
        token: &CancellationToken,
        data: &PostData,
        account: &Account,
    ) -> Result<PostResponse, WebsiteError> {
        let csrf = self.csrf(token, account).await?;
        let post_id = self.create_draft(token, account, &csrf, "text_only").await?;
        self.publish(token, account, &csrf, &post_id, data).await
    }

    fn transform_account_data(&self, _data: serde_json::Value) -> serde_json::Value {
        serde_json::json!({})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, RequestBody};
    use crate::types::{FilePayload, Submission, SubmissionPart, SubmissionType};

    fn account() -> Account {
        Account::new("creator", WebsiteId::Patreon, serde_json::Value::Null)
    }

    fn post_data(options: serde_json::Value, primary: bool) -> PostData {
        PostData {
            submission_id: "s".to_string(),
            account_id: "creator".to_string(),
            title: "Sketch dump".to_string(),
            description: "<p>Hi</p>".to_string(),
            tags: vec!["sketch".to_string(), "wip art".to_string()],
            rating: None,
            sources: Vec::new(),
            options,
            primary: primary.then(|| FilePayload::new("a.png", "image/png", vec![1u8])),
            thumbnail: None,
            additional: Vec::new(),
            fallback: None,
        }
    }

    fn input(options: serde_json::Value) -> ValidationInput {
        let submission = Submission::new(SubmissionType::Notification, "Update");
        let default_part = SubmissionPart {
            submission_id: submission.id.clone(),
            account_id: "default".to_string(),
            website: None,
            is_default: true,
            data: serde_json::json!({}),
        };
        let part = SubmissionPart {
            submission_id: submission.id.clone(),
            account_id: "creator".to_string(),
            website: Some(WebsiteId::Patreon),
            is_default: false,
            data: options,
        };
        ValidationInput::new(&submission, &default_part, &part).unwrap()
    }

    #[test]
    fn test_hr_rewrite() {
        let patreon = Patreon::new(Arc::new(MockTransport::new()));
        let html = patreon.parse_description("<p>a</p><hr /><p>b</p>");
        assert!(html.contains("<p>----------</p>"));
        assert!(!html.contains("<hr"));
    }

    #[tokio::test]
    async fn test_login_stores_tiers() {
        let transport = Arc::new(MockTransport::new().on_get(
            "/api/current_user",
            200,
            r#"{"data":{"id":"1","type":"user","attributes":{"full_name":"Ink Fox"}},
                "included":[
                  {"id":"c1","type":"campaign","attributes":{}},
                  {"id":"t5","type":"reward","attributes":{"title":"Supporter","amount_cents":500}}
                ]}"#,
        ));
        let patreon = Patreon::new(transport);
        let response = patreon.check_login_status(&account()).await;
        assert!(response.logged_in);
        assert_eq!(response.username.as_deref(), Some("Ink Fox"));

        let tiers = patreon.account_info().tiers("creator").unwrap();
        let ids: Vec<&str> = tiers.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![PUBLIC_TIER, PATRONS_TIER, "t5"]);
        assert_eq!(tiers[2].amount_cents, Some(500));
    }

    #[test]
    fn test_tier_required() {
        let patreon = Patreon::new(Arc::new(MockTransport::new()));
        let parts = patreon.validate_notification_submission(&input(serde_json::json!({})));
        assert_eq!(parts.problems, vec![MISSING_TIER]);
    }

    #[test]
    fn test_unknown_tier_is_a_warning() {
        let patreon = Patreon::new(Arc::new(MockTransport::new()));
        patreon.account_info().set(
            "creator",
            AccountInfo::Tiers(tiers_from(&[])),
        );
        let parts = patreon
            .validate_notification_submission(&input(serde_json::json!({"tiers": ["public", "t9"]})));
        assert!(parts.is_valid());
        assert_eq!(parts.warnings, vec!["Patreon tier t9 was not found on the account."]);
    }

    #[tokio::test]
    async fn test_post_file_runs_four_steps() {
        let transport = Arc::new(
            MockTransport::new()
                .on_get("/posts/new", 200, r#"{"csrfSignature": "sig"}"#)
                .on_post("/api/posts/77", 200, r#"{"data":{"id":"77","type":"post","attributes":{"patreon_url":"/posts/sketch-dump-77"}}}"#)
                .on_post("/api/posts", 200, r#"{"data":{"id":"77","type":"post"}}"#)
                .on_post("/api/media", 200, r#"{"data":{"id":"m","type":"media"}}"#),
        );
        let patreon = Patreon::new(transport.clone());
        let response = patreon
            .post_file_submission(
                &CancellationToken::new(),
                &post_data(serde_json::json!({"tiers": ["t5"]}), true),
                &account(),
            )
            .await
            .unwrap();

        assert_eq!(response.source.as_deref(), Some("https://www.patreon.com/posts/sketch-dump-77"));
        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[1].url.ends_with("/api/posts"));
        assert!(calls[2].url.ends_with("/api/media"));
        assert_eq!(calls[2].options.field("relationship_id"), Some("77"));
        assert!(calls
            .iter()
            .skip(1)
            .all(|c| c.options.headers.contains(&(CSRF_HEADER.to_string(), "sig".to_string()))));

        match &calls[3].options.body {
            RequestBody::Json(body) => {
                let tags = &body["data"]["relationships"]["user_defined_tags"]["data"];
                assert_eq!(tags[1]["id"], "user_defined;wip art");
                let rule = &body["data"]["relationships"]["access_rules"]["data"][0];
                assert_eq!(rule["relationships"]["tier"]["data"]["id"], "t5");
            }
            other => panic!("Expected JSON body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notification_skips_upload() {
        let transport = Arc::new(
            MockTransport::new()
                .on_get("/posts/new", 200, r#"{"csrfSignature": "sig"}"#)
                .on_post("/api/posts/5", 200, r#"{"data":{"id":"5","type":"post","attributes":{}}}"#)
                .on_post("/api/posts", 200, r#"{"data":{"id":"5","type":"post"}}"#),
        );
        let patreon = Patreon::new(transport.clone());
        let response = patreon
            .post_notification_submission(
                &CancellationToken::new(),
                &post_data(serde_json::json!({"tiers": ["public"]}), false),
                &account(),
            )
            .await
            .unwrap();

        assert!(response.source.is_none());
        assert_eq!(transport.call_count(), 3);
        match &transport.calls()[1].options.body {
            RequestBody::Json(body) => assert_eq!(body["data"]["attributes"]["post_type"], "text_only"),
            other => panic!("Expected JSON body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_draft_without_id_is_a_protocol_failure() {
        let transport = Arc::new(
            MockTransport::new()
                .on_get("/posts/new", 200, r#"{"csrfSignature": "sig"}"#)
                .on_post("/api/posts", 200, r#"{"data":{"id":"","type":"post"}}"#)
                .on_post("/api/media", 200, r#"{"data":{"id":"m","type":"media"}}"#),
        );
        let patreon = Patreon::new(transport.clone());
        let err = patreon
            .post_file_submission(
                &CancellationToken::new(),
                &post_data(serde_json::json!({"tiers": ["t5"]}), true),
                &account(),
            )
            .await
            .unwrap_err();

        match err {
            WebsiteError::Protocol { message, body } => {
                assert_eq!(message, "Patreon did not return a post id");
                assert!(body.unwrap_or_default().contains(r#""id":"""#));
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }
        assert_eq!(transport.urls().len(), 2);
        assert!(transport.urls()[1].ends_with("/api/posts"));
    }
}
