//! Core layer for shared JSON documents.
//!
//! - `JsonPath`: addresses into a JSON tree, absolute or relative
//! - `Command` / `Reply`: the vocabulary spoken to a JSON key-value engine
//! - `Engine`: the backend seam, implemented by in-process or remote engines
//! - `Connection`: the shared handle documents are built on
//!
//! # Example
//!
//! ```rust
//! use jsonipc_core::{json_path, Command, JsonPath};
//!
//! let cmd = Command::Get {
//!     key: "_ipc_status".to_string(),
//!     path: JsonPath::root().join(&json_path!("_ipc_obj")).unwrap(),
//! };
//! assert_eq!(cmd.to_string(), "get _ipc_status ._ipc_obj");
//! ```

mod command;
mod engine;
mod error;
mod path;

pub use command::{Clock, Command, JsonType, Reply};
pub use engine::{Connection, Engine};
pub use error::EngineError;
pub use path::{IntoJsonPath, JsonPath, PathError, ROOT, SEPARATOR};
