//! Error taxonomy for Admin API calls.

use thiserror::Error;

/// Errors surfaced by the Admin API client.
///
/// The sync layer keys its partial-failure policy off these variants, so
/// classification happens once, at the HTTP boundary, instead of being
/// re-derived from message text in stream code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401: the access token is missing, expired or revoked.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// 403 from REST or an ACCESS_DENIED GraphQL error: the token is
    /// valid but lacks a scope the request needs.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// 404: the shop or endpoint does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// 429 still returned after every retry attempt.
    #[error("rate limited on {0} after retries")]
    RateLimited(String),

    /// GraphQL request answered with top-level errors other than an
    /// access denial.
    #[error("GraphQL error: {0}")]
    Graphql(String),

    /// Transport-level failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other non-success status, with whatever the response body said.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A success status whose body does not have the expected shape.
    #[error("unexpected response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}
