//! HTTP seam between the client and the wire.
//!
//! [`Transport`] is the narrow trait the [`crate::GameClient`] talks
//! through; [`HttpTransport`] is the reqwest-backed production
//! implementation. Status-code and connection-failure classification
//! happens here so everything above deals only in the error taxonomy.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, RETRY_AFTER, SET_COOKIE};

use questline_core::{Error, Result};

/// Raw response as the client layer sees it: status, session cookies
/// the server set, and the undecoded body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub set_cookies: Vec<(String, String)>,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, cookies: &[(String, String)]) -> Result<RawResponse>;

    async fn post_json(
        &self,
        url: &str,
        cookies: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<RawResponse>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpTransport { client })
    }

    fn cookie_header(cookies: &[(String, String)]) -> String {
        cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    async fn run(&self, request: reqwest::RequestBuilder) -> Result<RawResponse> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        let body = response.text().await.map_err(map_reqwest_error)?;

        if status.as_u16() == 429 {
            return Err(Error::rate_limited(retry_after.unwrap_or(1)));
        }
        if status.is_server_error() {
            return Err(Error::network(true, format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(Error::network(false, format!("HTTP {status}")));
        }

        Ok(RawResponse {
            status: status.as_u16(),
            set_cookies,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, cookies: &[(String, String)]) -> Result<RawResponse> {
        let mut request = self.client.get(url);
        if !cookies.is_empty() {
            request = request.header(COOKIE, Self::cookie_header(cookies));
        }
        self.run(request).await
    }

    async fn post_json(
        &self,
        url: &str,
        cookies: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<RawResponse> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        if !cookies.is_empty() {
            request = request.header(COOKIE, Self::cookie_header(cookies));
        }
        self.run(request).await
    }
}

/// Connection resets and timeouts are worth retrying; anything that
/// points at the request itself is not.
fn map_reqwest_error(e: reqwest::Error) -> Error {
    let retryable = e.is_timeout() || e.is_connect() || e.is_body() || e.is_request();
    Error::network(retryable && !e.is_builder(), e.to_string())
}

/// First `name=value` segment of a `Set-Cookie` header.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let first = header.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
