//! In-process engine for shared JSON documents.
//!
//! `MemoryEngine` keeps every key in a mutex-guarded map and answers the
//! same commands a remote JSON key-value engine would, which makes it the
//! engine of choice for tests and for single-process deployments.

mod engine;
pub mod json_utils;

pub use engine::MemoryEngine;
