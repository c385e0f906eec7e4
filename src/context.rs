//! The run context: everything one tap invocation carries around.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use shopify_api::ShopifyClient;
use singer::{Catalog, State};

use crate::config::TapConfig;

/// Synthetic shop attributes stamped onto every emitted record, with the
/// JSON type each takes in the merged schemas.
pub const SDC_KEYS: &[(&str, &str)] = &[
    ("id", "integer"),
    ("name", "string"),
    ("myshopify_domain", "string"),
];

/// Prefix distinguishing synthetic fields from raw Shopify fields.
pub const SDC_PREFIX: &str = "_sdc_shop_";

/// State for one run: configuration, the authenticated client, the
/// catalog driving selection, mutable bookmark state, per-stream record
/// counts and the shop attributes resolved at startup. Created at run
/// start, dropped when the run ends.
pub struct Context {
    pub config: TapConfig,
    pub client: ShopifyClient,
    pub catalog: Catalog,
    pub state: State,
    pub counts: BTreeMap<String, u64>,
    sdc_fields: Map<String, Value>,
}

impl Context {
    pub fn new(
        config: TapConfig,
        client: ShopifyClient,
        catalog: Catalog,
        state: State,
        shop: &Value,
    ) -> Self {
        Self {
            config,
            client,
            catalog,
            state,
            counts: BTreeMap::new(),
            sdc_fields: sdc_fields_from_shop(shop),
        }
    }

    /// The `_sdc_shop_*` fields merged into every record.
    pub fn sdc_fields(&self) -> &Map<String, Value> {
        &self.sdc_fields
    }
}

/// Pulls the synthetic key values out of the shop resource. An attribute
/// the response lacks still appears, as null, so record shape does not
/// depend on the shop's plan.
fn sdc_fields_from_shop(shop: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    for (key, _) in SDC_KEYS {
        let value = shop.get(*key).cloned().unwrap_or(Value::Null);
        fields.insert(format!("{SDC_PREFIX}{key}"), value);
    }
    fields
}
