//! Revisioned JSON documents shared between processes.
//!
//! A [`SharedDocument`] stores one labeled JSON value in an engine key,
//! next to metadata (`rev`, `created_at`, `updated_at`) that every mutation
//! updates in the same round trip. Readers poll with
//! [`SharedDocument::get_if_updated`], which only moves the payload when
//! the revision changed.
//!
//! # Example
//!
//! ```rust
//! use jsonipc_document::{IpcConfig, Registry};
//! use serde_json::json;
//!
//! let registry = Registry::from_config(&IpcConfig::default()).unwrap();
//! let writer = registry.document("memory", "active_info").unwrap();
//! let reader = registry.document("memory", "active_info").unwrap();
//!
//! writer.set(json!({"obsnum": 1}), ".").unwrap();
//! let cached = reader.get_if_updated(None).unwrap();
//! assert_eq!(cached.as_ref().map(|s| s.rev()), Some(0));
//!
//! writer.set(json!(2), "obsnum").unwrap();
//! let fresh = reader.get_if_updated(cached).unwrap().unwrap();
//! assert_eq!(fresh.payload, json!({"obsnum": 2}));
//! ```

mod document;
mod error;
mod pipeline;
mod registry;
mod snapshot;

pub use document::{Op, SharedDocument, KEY_PREFIX};
pub use error::Error;
pub use pipeline::{Entry, PipelineContext};
pub use registry::{
    BackendConfig, DefaultEngineFactory, EngineFactory, IpcConfig, Registry, DEFAULT_BACKEND,
};
pub use snapshot::{Lookup, Metadata, Snapshot, Status, META_FIELD, PAYLOAD_FIELD};
