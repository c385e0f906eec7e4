//! Shopify Admin API client
//!
//! REST and GraphQL access for tap-shopify: authenticated requests,
//! Link-header cursor pagination, bounded retry for rate limits and
//! server errors, and classification of Shopify error responses into
//! [`ApiError`] variants the sync layer can key policy decisions off.

mod client;
mod error;
mod graphql;

// Re-export client types
pub use client::{ClientConfig, RestPage, ShopifyClient};

// Re-export error types
pub use error::ApiError;

// Re-export GraphQL helpers
pub use graphql::{parse_gid, ConnectionEdge, ConnectionPage, PageInfo};
