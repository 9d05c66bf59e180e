//! jsonipc: JSON documents shared between processes through a key-value
//! engine.
//!
//! Layers, leaves first:
//!
//! - [`jsonipc_core`]: paths, engine commands and the `Engine` seam
//! - [`jsonipc_memory`]: the in-process engine
//! - [`jsonipc_document`]: `SharedDocument`, pipelines and the backend registry
//!
//! The most used items are re-exported at the top level.

pub use jsonipc_core;
pub use jsonipc_document;
pub use jsonipc_memory;

pub use jsonipc_core::{json_path, Connection, Engine, EngineError, JsonPath, PathError};
pub use jsonipc_document::{
    Error, IpcConfig, Lookup, Metadata, PipelineContext, Registry, SharedDocument, Snapshot,
    Status,
};
pub use jsonipc_memory::MemoryEngine;
