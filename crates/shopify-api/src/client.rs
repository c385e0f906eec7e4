//! Authenticated HTTP access to a single Shopify store.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;

const USER_AGENT: &str = concat!("tap-shopify/", env!("CARGO_PKG_VERSION"));
const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

const MAX_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Settings for constructing a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store subdomain or full domain, e.g. `mystore` or
    /// `mystore.myshopify.com`.
    pub shop: String,
    /// Admin API access token.
    pub access_token: String,
    /// Admin API version, e.g. `2025-01`.
    pub api_version: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// One page of a REST listing plus the cursor to the page after it.
#[derive(Debug)]
pub struct RestPage {
    pub body: Value,
    pub next_page_info: Option<String>,
}

impl RestPage {
    /// Unwraps the records under the listing's envelope key, e.g. the
    /// `orders` array in an `orders.json` body.
    pub fn records(self, envelope: &str, endpoint: &str) -> Result<Vec<Value>, ApiError> {
        let records = match self.body {
            Value::Object(mut map) => map.remove(envelope),
            _ => None,
        };
        match records {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(ApiError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: format!("missing '{envelope}' array"),
            }),
        }
    }
}

/// Shopify Admin API client: REST plus GraphQL against one store.
///
/// Bounded retry for 429 and 5xx responses lives here. Callers never see
/// a retryable status until the attempt budget is spent; everything else
/// is classified into [`ApiError`] on the first response. Cloning is
/// cheap, the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct ShopifyClient {
    base_url: String,
    api_version: String,
    access_token: String,
    client: reqwest::Client,
}

impl ShopifyClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()?;
        let domain = if config.shop.contains('.') {
            config.shop.clone()
        } else {
            format!("{}.myshopify.com", config.shop)
        };
        Ok(Self {
            base_url: format!("https://{domain}"),
            api_version: config.api_version.clone(),
            access_token: config.access_token.clone(),
            client,
        })
    }

    /// Client pointed at an arbitrary base URL instead of a store domain.
    /// Lets tests drive the client against a local mock server.
    pub fn with_base_url(
        base_url: &str,
        access_token: &str,
        api_version: &str,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            access_token: access_token.to_string(),
            client,
        })
    }

    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/admin/api/{}/{}", self.base_url, self.api_version, endpoint)
    }

    pub(crate) fn post_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
    }

    /// GETs one page of a REST endpoint. `query` carries the caller's
    /// filters; for pages after the first, pass the previous page's
    /// `page_info` cursor as the only filter.
    pub async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<RestPage, ApiError> {
        let url = self.endpoint_url(endpoint);
        debug!(endpoint, "fetching page");
        let response = self
            .send_with_retry(
                || {
                    self.client
                        .get(&url)
                        .query(query)
                        .header(ACCESS_TOKEN_HEADER, &self.access_token)
                },
                endpoint,
            )
            .await?;
        let next_page_info = next_page_info(response.headers());
        let body: Value = response.json().await?;
        Ok(RestPage {
            body,
            next_page_info,
        })
    }

    /// The shop resource for the authenticated store. The first call any
    /// run makes, doubling as the credential check.
    pub async fn shop_details(&self) -> Result<Value, ApiError> {
        let page = self.get("shop.json", &[]).await?;
        let shop = match page.body {
            Value::Object(mut map) => map.remove("shop"),
            _ => None,
        };
        shop.filter(Value::is_object).ok_or_else(|| ApiError::InvalidResponse {
            endpoint: "shop.json".to_string(),
            message: "missing 'shop' object".to_string(),
        })
    }

    pub(crate) async fn send_with_retry<F>(
        &self,
        build: F,
        endpoint: &str,
    ) -> Result<reqwest::Response, ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            let response = build().send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let retryable =
                status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < MAX_ATTEMPTS {
                let delay = retry_delay(response.headers(), attempt);
                warn!(
                    endpoint,
                    status = status.as_u16(),
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ApiError::RateLimited(endpoint.to_string()));
            }
            return Err(classify_error_response(status, endpoint, response).await);
        }
    }
}

/// Maps a non-retryable (or retry-exhausted) error response to its
/// [`ApiError`] class, consuming the body for context where useful.
async fn classify_error_response(
    status: StatusCode,
    endpoint: &str,
    response: reqwest::Response,
) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => {
            ApiError::Unauthorized("invalid or expired access token".to_string())
        }
        StatusCode::FORBIDDEN => {
            ApiError::AccessDenied(format!("missing API scope for {endpoint}"))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(endpoint.to_string()),
        _ => {
            let message = response
                .text()
                .await
                .ok()
                .and_then(|body| extract_errors(&body))
                .unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("unknown error").to_string()
                });
            ApiError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// Shopify error bodies look like `{"errors": "reason"}` or
/// `{"errors": {"field": [..]}}`. Extraction is best effort, the status
/// code alone already makes the error fatal.
fn extract_errors(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("errors")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// How long to wait before the next attempt. Shopify sends fractional
/// seconds in `Retry-After` on 429s.
fn retry_delay(headers: &HeaderMap, attempt: u32) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(RETRY_BASE_DELAY * attempt)
}

fn next_page_info(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    parse_next_page_info(link)
}

/// Pulls the `page_info` cursor out of a Link header of the form
/// `<https://...?limit=175&page_info=abc>; rel="next", <...>; rel="previous"`.
pub(crate) fn parse_next_page_info(link: &str) -> Option<String> {
    for part in link.split(',') {
        let mut sections = part.split(';');
        let url = sections
            .next()?
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');
        if !sections.any(|s| s.trim() == "rel=\"next\"") {
            continue;
        }
        let query = url.split('?').nth(1).unwrap_or("");
        for pair in query.split('&') {
            if let Some(cursor) = pair.strip_prefix("page_info=") {
                return Some(cursor.to_string());
            }
        }
    }
    None
}
