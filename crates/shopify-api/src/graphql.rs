//! GraphQL Admin API access: query execution, typed connection pages,
//! scope introspection, and global-id helpers.
//!
//! GraphQL transports failures in-band as a top-level `errors` array on a
//! 200 response, so classification happens on the body rather than the
//! status line.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::ShopifyClient;
use crate::error::ApiError;

const ACCESS_SCOPES_QUERY: &str = "\
query {
  currentAppInstallation {
    accessScopes {
      handle
    }
  }
}";

/// One page of a GraphQL connection field: the edge nodes plus the
/// cursor state needed to request the next page. Nodes stay untyped;
/// their shape belongs to the query that fetched them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPage {
    pub edges: Vec<ConnectionEdge>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionEdge {
    pub node: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl ShopifyClient {
    /// Executes a GraphQL query and returns the `data` payload. An
    /// `ACCESS_DENIED` error code maps to [`ApiError::AccessDenied`] the
    /// same way a REST 403 would.
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ApiError> {
        let url = self.endpoint_url("graphql.json");
        let body = json!({"query": query, "variables": variables});
        let response = self
            .send_with_retry(|| self.post_request(&url).json(&body), "graphql.json")
            .await?;
        let mut payload: Value = response.json().await?;

        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(classify_graphql_errors(errors));
            }
        }
        match payload.get_mut("data").map(Value::take) {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(ApiError::InvalidResponse {
                endpoint: "graphql.json".to_string(),
                message: "response has neither data nor errors".to_string(),
            }),
        }
    }

    /// Executes a connection query and deserializes the named top-level
    /// field of the `data` payload into a typed page.
    pub async fn graphql_connection(
        &self,
        query: &str,
        variables: Value,
        field: &str,
    ) -> Result<ConnectionPage, ApiError> {
        let mut data = self.graphql(query, variables).await?;
        match data.get_mut(field).map(Value::take) {
            Some(connection) if !connection.is_null() => {
                Ok(serde_json::from_value(connection)?)
            }
            _ => Err(ApiError::InvalidResponse {
                endpoint: "graphql.json".to_string(),
                message: format!("response is missing the {field} connection"),
            }),
        }
    }

    /// The scope handles granted to the authenticated credential, from
    /// the `currentAppInstallation` introspection field. One network
    /// call; callers cache the result for the run.
    pub async fn access_scopes(&self) -> Result<HashSet<String>, ApiError> {
        let data = self.graphql(ACCESS_SCOPES_QUERY, json!({})).await?;
        let scopes = data
            .pointer("/currentAppInstallation/accessScopes")
            .and_then(Value::as_array)
            .ok_or_else(|| ApiError::InvalidResponse {
                endpoint: "graphql.json".to_string(),
                message: "missing currentAppInstallation.accessScopes".to_string(),
            })?;
        Ok(scopes
            .iter()
            .filter_map(|scope| scope.get("handle").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

fn classify_graphql_errors(errors: &[Value]) -> ApiError {
    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect();
    let message = if messages.is_empty() {
        Value::Array(errors.to_vec()).to_string()
    } else {
        messages.join("; ")
    };
    let denied = errors.iter().any(|e| {
        e.pointer("/extensions/code").and_then(Value::as_str) == Some("ACCESS_DENIED")
    }) || message.contains("Access denied");
    if denied {
        ApiError::AccessDenied(message)
    } else {
        ApiError::Graphql(message)
    }
}

/// Converts a GraphQL global id like `gid://shopify/FulfillmentOrder/123`
/// to the legacy integer id the REST schemas use.
pub fn parse_gid(gid: &str) -> Option<i64> {
    gid.rsplit('/').next()?.split('?').next()?.parse().ok()
}
