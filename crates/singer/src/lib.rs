//! Singer tap protocol primitives
//!
//! Shared building blocks for extract-only connectors speaking the Singer
//! protocol: the SCHEMA/RECORD/STATE message types and JSON-lines writer,
//! the discovery catalog with its breadcrumb metadata, per-stream bookmark
//! state, and the schema-driven record transformer.
//!
//! Nothing in this crate knows about any particular upstream API; taps
//! plug their own schemas, streams and bookmarks into these types.

pub mod catalog;
pub mod message;
pub mod metadata;
pub mod state;
pub mod transform;

// Re-export catalog types
pub use catalog::{Catalog, CatalogEntry, ReplicationMethod};

// Re-export message types
pub use message::{Message, MessageSink, MessageWriter};

// Re-export metadata types
pub use metadata::{field_breadcrumb, Breadcrumb, Inclusion, MetadataEntry, MetadataMap};

// Re-export state types
pub use state::State;

// Re-export transformer types
pub use transform::{IntegerDatetimeParsing, TransformError, Transformer};
