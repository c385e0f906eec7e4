//! tap-shopify library
//!
//! A Singer tap for Shopify stores. The tap discovers the streams a
//! credential can extract as a catalog document, then syncs the selected
//! streams as SCHEMA/RECORD/STATE messages on stdout, resuming from
//! per-stream bookmarks across runs.
//!
//! # Module layout
//!
//! - [`config`] - the `--config` file: credentials, start date, paging
//! - [`context`] - everything one run carries around
//! - [`capability`] - scope-gated field classification
//! - [`discover`] - embedded schemas and the catalog builder
//! - [`streams`] - per-resource sync strategies behind a uniform contract
//! - [`sync`] - the orchestrator: ordering, checkpoints, failure policy
//!
//! Protocol types (messages, catalog, state, transformer) live in the
//! `singer` crate; HTTP specifics live in `shopify-api`.
//!
//! # CLI Usage
//!
//! ```bash
//! # Discover the catalog
//! tap-shopify --config config.json --discover > catalog.json
//!
//! # Sync selected streams, resuming from state
//! tap-shopify --config config.json --catalog catalog.json --state state.json
//! ```

pub mod capability;
pub mod config;
pub mod context;
pub mod discover;
pub mod streams;
pub mod sync;

// Re-export the types run setup touches
pub use capability::Capability;
pub use config::TapConfig;
pub use context::Context;
