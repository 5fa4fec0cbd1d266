//! Scripted transport for tests
//!
//! Routes match on method and a URL substring. Each route holds a queue of
//! responses: they are handed out in order and the last one repeats. Every
//! request is recorded, and an optional hook runs after each call so tests can
//! cancel a token between two steps of a multi-step post.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{HttpMethod, RequestOptions, Transport, TransportResponse};

/// A request observed by [`MockTransport`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub url: String,
    pub account_id: String,
    pub options: RequestOptions,
}

struct Route {
    method: HttpMethod,
    url_contains: String,
    responses: VecDeque<TransportResponse>,
}

type CallHook = Box<dyn Fn(usize, &RecordedCall) + Send + Sync>;

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    hook: Option<CallHook>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for requests matching `method` and `url_contains`
    pub fn respond(self, method: HttpMethod, url_contains: &str, response: TransportResponse) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.url_contains == url_contains)
            {
                Some(route) => route.responses.push_back(response),
                None => routes.push(Route {
                    method,
                    url_contains: url_contains.to_string(),
                    responses: VecDeque::from([response]),
                }),
            }
        }
        self
    }

    pub fn on_get(self, url_contains: &str, status: u16, body: &str) -> Self {
        let response = scripted(url_contains, status, body);
        self.respond(HttpMethod::Get, url_contains, response)
    }

    pub fn on_post(self, url_contains: &str, status: u16, body: &str) -> Self {
        let response = scripted(url_contains, status, body);
        self.respond(HttpMethod::Post, url_contains, response)
    }

    /// Like [`on_post`](Self::on_post) but with an explicit post-redirect URL
    pub fn on_post_redirect(self, url_contains: &str, body: &str, final_url: &str) -> Self {
        let response = TransportResponse::ok(body, final_url);
        self.respond(HttpMethod::Post, url_contains, response)
    }

    /// Run `hook(call_number, call)` after every request; numbering starts at 1
    pub fn with_hook(mut self, hook: impl Fn(usize, &RecordedCall) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }

    fn handle(&self, method: HttpMethod, url: &str, account_id: &str, options: RequestOptions) -> TransportResponse {
        let call = RecordedCall {
            method,
            url: url.to_string(),
            account_id: account_id.to_string(),
            options,
        };

        let count = match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(call.clone());
                calls.len()
            }
            Err(_) => 0,
        };

        let response = self
            .routes
            .lock()
            .ok()
            .and_then(|mut routes| {
                routes
                    .iter_mut()
                    .find(|r| r.method == method && url.contains(&r.url_contains))
                    .map(|route| {
                        if route.responses.len() > 1 {
                            route.responses.pop_front().unwrap_or_else(|| not_found(url))
                        } else {
                            route.responses.front().cloned().unwrap_or_else(|| not_found(url))
                        }
                    })
            })
            .unwrap_or_else(|| not_found(url));

        if let Some(hook) = &self.hook {
            hook(count, &call);
        }

        response
    }
}

fn scripted(url: &str, status: u16, body: &str) -> TransportResponse {
    TransportResponse {
        body: body.to_string(),
        status_code: status,
        error: None,
        final_url: url.to_string(),
    }
}

fn not_found(url: &str) -> TransportResponse {
    TransportResponse {
        body: format!("no scripted response for {}", url),
        status_code: 404,
        error: None,
        final_url: url.to_string(),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, account_id: &str, options: RequestOptions) -> TransportResponse {
        self.handle(HttpMethod::Get, url, account_id, options)
    }

    async fn post(&self, url: &str, account_id: &str, options: RequestOptions) -> TransportResponse {
        self.handle(HttpMethod::Post, url, account_id, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_responses_are_served_in_order_and_last_repeats() {
        let transport = MockTransport::new()
            .on_get("/page", 200, "first")
            .on_get("/page", 500, "second");

        let a = transport.get("https://x/page", "acc", RequestOptions::new()).await;
        let b = transport.get("https://x/page", "acc", RequestOptions::new()).await;
        let c = transport.get("https://x/page", "acc", RequestOptions::new()).await;

        assert_eq!(a.body, "first");
        assert_eq!(b.status_code, 500);
        assert_eq!(c.status_code, 500);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unmatched_route_is_404() {
        let transport = MockTransport::new().on_get("/page", 200, "ok");
        let response = transport.post("https://x/page", "acc", RequestOptions::new()).await;
        assert_eq!(response.status_code, 404);
    }

    #[tokio::test]
    async fn test_hook_sees_call_numbers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let transport = MockTransport::new().with_hook(move |n, _| {
            counter.store(n, Ordering::SeqCst);
        });

        transport.get("https://x/a", "acc", RequestOptions::new()).await;
        transport.get("https://x/b", "acc", RequestOptions::new()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(transport.urls(), vec!["https://x/a", "https://x/b"]);
    }
}
