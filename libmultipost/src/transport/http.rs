//! `reqwest`-backed transport with one cookie jar per account

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Url};
use tracing::debug;

use super::{FormField, HttpMethod, RequestBody, RequestOptions, Transport, TransportResponse};
use crate::config::TransportConfig;
use crate::error::WebsiteError;

/// HTTP transport used in production
///
/// Cookies are handled by hand instead of through the client's cookie
/// provider so each account gets its own jar while sharing one connection
/// pool.
pub struct HttpTransport {
    client: reqwest::Client,
    jars: RwLock<HashMap<String, Arc<Jar>>>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, WebsiteError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.redirect_limit))
            .build()
            .map_err(|e| WebsiteError::Transport {
                message: format!("Failed to build HTTP client: {}", e),
                status: None,
                body: None,
            })?;

        Ok(Self {
            client,
            jars: RwLock::new(HashMap::new()),
        })
    }

    fn jar(&self, account_id: &str) -> Arc<Jar> {
        if let Some(jar) = self
            .jars
            .read()
            .ok()
            .and_then(|jars| jars.get(account_id).cloned())
        {
            return jar;
        }

        match self.jars.write() {
            Ok(mut jars) => jars
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(Jar::default()))
                .clone(),
            // A poisoned lock only loses cookie persistence for this request
            Err(_) => Arc::new(Jar::default()),
        }
    }

    /// Seed an account's jar with cookies captured elsewhere (login window)
    ///
    /// Each entry is a `Set-Cookie` style string such as `a=1; Domain=example.com`.
    pub fn import_cookies(&self, account_id: &str, url: &str, cookies: &[String]) -> Result<(), WebsiteError> {
        let url = Url::parse(url)
            .map_err(|e| WebsiteError::InvalidOptions(format!("Invalid cookie url {}: {}", url, e)))?;
        let jar = self.jar(account_id);
        for cookie in cookies {
            jar.add_cookie_str(cookie, &url);
        }
        Ok(())
    }

    /// Cookie header the jar would send to `url` for `account_id`
    pub fn cookie_header(&self, account_id: &str, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        self.jar(account_id)
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        account_id: &str,
        options: RequestOptions,
    ) -> TransportResponse {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return TransportResponse::failed(url, format!("Invalid url: {}", e)),
        };

        debug!(%method, url, account_id, "Sending request");

        let http_method = match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut request = self.client.request(http_method, parsed.clone());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let jar = (!options.skip_cookies).then(|| self.jar(account_id));
        if let Some(cookies) = jar.as_ref().and_then(|jar| jar.cookies(&parsed)) {
            request = request.header(COOKIE, cookies);
        }

        request = match options.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(&value),
            RequestBody::Form(pairs) => request.form(&pairs),
            RequestBody::Multipart(fields) => match build_multipart(fields) {
                Ok(form) => request.multipart(form),
                Err(e) => return TransportResponse::failed(url, e),
            },
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return TransportResponse::failed(url, e.to_string()),
        };

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        if options.update_cookies {
            if let Some(jar) = &jar {
                let mut headers = response.headers().get_all(SET_COOKIE).iter();
                jar.set_cookies(&mut headers, response.url());
            }
        }

        debug!(%method, url, status_code, final_url, "Received response");

        match response.text().await {
            Ok(body) => TransportResponse {
                body,
                status_code,
                error: None,
                final_url,
            },
            Err(e) => TransportResponse {
                body: String::new(),
                status_code,
                error: Some(format!("Failed to read response body: {}", e)),
                final_url,
            },
        }
    }
}

fn build_multipart(fields: Vec<FormField>) -> Result<Form, String> {
    let mut form = Form::new();
    for field in fields {
        form = match field {
            FormField::Text { name, value } => form.text(name, value),
            FormField::File { name, file } => {
                let part = Part::bytes(file.data.to_vec())
                    .file_name(file.file_name)
                    .mime_str(&file.mimetype)
                    .map_err(|e| format!("Invalid mimetype {}: {}", file.mimetype, e))?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, account_id: &str, options: RequestOptions) -> TransportResponse {
        self.execute(HttpMethod::Get, url, account_id, options).await
    }

    async fn post(&self, url: &str, account_id: &str, options: RequestOptions) -> TransportResponse {
        self.execute(HttpMethod::Post, url, account_id, options).await
    }

    fn clear_account(&self, account_id: &str) {
        if let Ok(mut jars) = self.jars.write() {
            jars.remove(account_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(&TransportConfig::default()).unwrap()
    }

    #[test]
    fn test_imported_cookies_are_partitioned() {
        let transport = transport();
        transport
            .import_cookies("a", "https://example.com/", &["session=alpha".to_string()])
            .unwrap();

        assert_eq!(
            transport.cookie_header("a", "https://example.com/page").as_deref(),
            Some("session=alpha")
        );
        assert_eq!(transport.cookie_header("b", "https://example.com/page"), None);
    }

    #[test]
    fn test_clear_account_drops_jar() {
        let transport = transport();
        transport
            .import_cookies("a", "https://example.com/", &["session=alpha".to_string()])
            .unwrap();
        transport.clear_account("a");
        assert_eq!(transport.cookie_header("a", "https://example.com/"), None);
    }

    #[test]
    fn test_import_rejects_bad_url() {
        let transport = transport();
        assert!(transport.import_cookies("a", "not a url", &[]).is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_yields_error_envelope() {
        let transport = transport();
        let response = transport.get("::::", "a", RequestOptions::new()).await;
        assert_eq!(response.status_code, 0);
        assert!(response.error.unwrap().contains("Invalid url"));
    }
}
