//! Session/transport contract used by every website adapter
//!
//! Adapters never talk to `reqwest` directly. They issue requests through a
//! [`Transport`], which owns one cookie partition per account id and returns a
//! uniform [`TransportResponse`] whether the request succeeded, failed at the
//! HTTP level or never reached the server.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WebsiteError;
use crate::types::{FilePayload, WebsiteId};

pub mod http;
// Scripted transport, available outside tests so integration suites can use it
pub mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

/// Highest status code treated as success (`303 See Other` after form posts)
pub const MAX_SUCCESS_STATUS: u16 = 303;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// One field of a multipart body
#[derive(Debug, Clone, PartialEq)]
pub enum FormField {
    Text { name: String, value: String },
    File { name: String, file: FilePayload },
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormField::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(name: impl Into<String>, file: FilePayload) -> Self {
        FormField::File {
            name: name.into(),
            file,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FormField::Text { name, .. } | FormField::File { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<FormField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Neither send nor store cookies for this request
    pub skip_cookies: bool,
    /// Store `Set-Cookie` headers into the account's jar
    pub update_cookies: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            body: RequestBody::Empty,
            skip_cookies: false,
            update_cookies: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, WebsiteError> {
        let value = serde_json::to_value(value)
            .map_err(|e| WebsiteError::InvalidOptions(format!("Unserializable body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn json_value(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    pub fn multipart(mut self, fields: Vec<FormField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    pub fn skip_cookies(mut self) -> Self {
        self.skip_cookies = true;
        self
    }

    pub fn keep_cookies(mut self) -> Self {
        self.update_cookies = false;
        self
    }

    /// Value of a text field in a multipart or form body
    pub fn field(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Multipart(fields) => fields.iter().find_map(|f| match f {
                FormField::Text { name: n, value } if n == name => Some(value.as_str()),
                _ => None,
            }),
            RequestBody::Form(pairs) => pairs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// Uniform response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse<T = String> {
    pub body: T,
    /// `0` when the request never produced a response
    pub status_code: u16,
    /// Transport-level error (connection refused, timeout, bad URL ...)
    pub error: Option<String>,
    /// URL after redirects
    pub final_url: String,
}

impl TransportResponse<String> {
    pub fn ok(body: impl Into<String>, final_url: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status_code: 200,
            error: None,
            final_url: final_url.into(),
        }
    }

    pub fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            body: String::new(),
            status_code: 0,
            error: Some(error.into()),
            final_url: url.to_string(),
        }
    }

    /// Decode the body as JSON; decode failures are protocol failures
    pub fn json<T: DeserializeOwned>(&self) -> Result<TransportResponse<T>, WebsiteError> {
        let body = serde_json::from_str(&self.body).map_err(|e| WebsiteError::Protocol {
            message: format!("Unexpected response from {}: {}", self.final_url, e),
            body: Some(self.body.clone()),
        })?;
        Ok(TransportResponse {
            body,
            status_code: self.status_code,
            error: self.error.clone(),
            final_url: self.final_url.clone(),
        })
    }
}

impl<T> TransportResponse<T> {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..=MAX_SUCCESS_STATUS).contains(&self.status_code)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, account_id: &str, options: RequestOptions) -> TransportResponse;

    async fn post(&self, url: &str, account_id: &str, options: RequestOptions) -> TransportResponse;

    /// Drop every cookie held for `account_id`
    fn clear_account(&self, _account_id: &str) {}
}

/// Reject transport errors and statuses outside `200..=303`
///
/// The failure carries the response body so callers can surface it as
/// diagnostic information.
pub fn verify_response(website: WebsiteId, response: &TransportResponse) -> Result<(), WebsiteError> {
    if let Some(error) = &response.error {
        return Err(WebsiteError::Transport {
            message: format!("{} request failed: {}", website.display_name(), error),
            status: (response.status_code != 0).then_some(response.status_code),
            body: Some(response.body.clone()),
        });
    }

    if !(200..=MAX_SUCCESS_STATUS).contains(&response.status_code) {
        return Err(WebsiteError::Transport {
            message: format!(
                "{} responded with status {}",
                website.display_name(),
                response.status_code
            ),
            status: Some(response.status_code),
            body: Some(response.body.clone()),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> TransportResponse {
        TransportResponse {
            body: "body".to_string(),
            status_code: status,
            error: None,
            final_url: "https://example.com".to_string(),
        }
    }

    #[test]
    fn test_verify_accepts_success_range() {
        for status in [200, 201, 204, 301, 302, 303] {
            assert!(verify_response(WebsiteId::Weasyl, &response(status)).is_ok());
        }
    }

    #[test]
    fn test_verify_rejects_outside_range() {
        for status in [199, 304, 400, 403, 500] {
            let err = verify_response(WebsiteId::Weasyl, &response(status)).unwrap_err();
            match err {
                WebsiteError::Transport { status: s, body, .. } => {
                    assert_eq!(s, Some(status));
                    assert_eq!(body.as_deref(), Some("body"));
                }
                other => panic!("Expected transport error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_verify_rejects_transport_error() {
        let failed = TransportResponse::failed("https://example.com", "connection refused");
        let err = verify_response(WebsiteId::Discord, &failed).unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("Discord"));
    }

    #[test]
    fn test_json_decode_failure_is_protocol_error() {
        let response = TransportResponse::ok("<html>", "https://example.com/api");
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, WebsiteError::Protocol { .. }));
        assert_eq!(err.body(), Some("<html>"));
    }

    #[test]
    fn test_request_options_field_lookup() {
        let options = RequestOptions::new().multipart(vec![
            FormField::text("title", "Hello"),
            FormField::file("file", FilePayload::new("a.png", "image/png", vec![1u8, 2])),
        ]);
        assert_eq!(options.field("title"), Some("Hello"));
        assert_eq!(options.field("file"), None);

        let options = RequestOptions::new().form(vec![("key".to_string(), "abc".to_string())]);
        assert_eq!(options.field("key"), Some("abc"));
    }

    #[test]
    fn test_request_options_defaults() {
        let options = RequestOptions::default();
        assert!(!options.skip_cookies);
        assert!(options.update_cookies);
        assert_eq!(options.body, RequestBody::Empty);
    }
}
