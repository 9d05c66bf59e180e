//! A JSON document shared between processes through one engine key.
//!
//! The record stored under the key looks like:
//!
//! ```json
//! {
//!     "_ipc_obj": {"a": "b"},
//!     "_ipc_meta": {
//!         "key": "_ipc_label",
//!         "rev": 0,
//!         "created_at": [1700000000, 0],
//!         "updated_at": [1700000000, 0]
//!     }
//! }
//! ```
//!
//! Paths handed to [`SharedDocument`] are relative to `_ipc_obj`. Every
//! mutation is sent as one batch that bumps `rev`, stamps `updated_at` with
//! the engine clock as the batch runs and applies the change, so readers
//! never see a new payload with an old revision or the other way round.

use std::time::Duration;

use lazy_static::lazy_static;
use serde_json::{json, Value as JsonValue};

use jsonipc_core::{
    json_path, Command, Connection, IntoJsonPath, JsonPath, JsonType, PathError, Reply,
};

use crate::error::Error;
use crate::pipeline::PipelineContext;
use crate::snapshot::{Lookup, Metadata, Snapshot, Status, META_FIELD, PAYLOAD_FIELD};

/// Prefix turning a label into a storage key.
pub const KEY_PREFIX: &str = "_ipc_";

lazy_static! {
    static ref PAYLOAD_PATH: JsonPath = json_path!(&format!(".{}", PAYLOAD_FIELD));
    static ref META_PATH: JsonPath = json_path!(&format!(".{}", META_FIELD));
    static ref REV_PATH: JsonPath = json_path!(&format!(".{}.rev", META_FIELD));
    static ref UPDATED_AT_PATH: JsonPath = json_path!(&format!(".{}.updated_at", META_FIELD));
}

/// An operation routed through [`SharedDocument::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Get,
    Type,
    ObjKeys,
    ObjLen,
    ArrLen,
    StrLen,
    Set(JsonValue),
    NumIncrBy(i64),
    ArrAppend(Vec<JsonValue>),
    StrAppend(String),
}

impl Op {
    /// Whether this op changes the payload (and so bumps the revision).
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Op::Set(_) | Op::NumIncrBy(_) | Op::ArrAppend(_) | Op::StrAppend(_)
        )
    }

    fn into_command(self, key: String, path: JsonPath) -> Command {
        match self {
            Op::Get => Command::Get { key, path },
            Op::Type => Command::Type { key, path },
            Op::ObjKeys => Command::ObjKeys { key, path },
            Op::ObjLen => Command::ObjLen { key, path },
            Op::ArrLen => Command::ArrLen { key, path },
            Op::StrLen => Command::StrLen { key, path },
            Op::Set(value) => Command::Set { key, path, value },
            Op::NumIncrBy(by) => Command::NumIncrBy { key, path, by },
            Op::ArrAppend(values) => Command::ArrAppend { key, path, values },
            Op::StrAppend(suffix) => Command::StrAppend { key, path, suffix },
        }
    }
}

/// A handle on one labeled document.
///
/// Handles are cheap to create and hold no mutable state, so one handle can
/// be shared by any number of threads.
///
/// # Example
///
/// ```rust
/// use jsonipc_core::Connection;
/// use jsonipc_document::SharedDocument;
/// use jsonipc_memory::MemoryEngine;
/// use serde_json::json;
///
/// let conn = Connection::from_engine(MemoryEngine::new());
/// let doc = SharedDocument::new(conn, "status");
///
/// doc.set(json!({"progress": 0}), ".").unwrap();
/// doc.set(json!(50), "progress").unwrap();
/// assert_eq!(doc.get("progress").unwrap(), Some(json!(50)));
/// assert_eq!(doc.revision().unwrap(), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct SharedDocument {
    label: String,
    key: String,
    conn: Connection,
}

impl SharedDocument {
    pub fn new(conn: Connection, label: impl Into<String>) -> Self {
        let label = label.into();
        let key = Self::storage_key(&label);
        Self { label, key, conn }
    }

    /// The engine key used for `label`.
    pub fn storage_key(label: &str) -> String {
        format!("{}{}", KEY_PREFIX, label)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// A fresh pipeline on this document's connection.
    pub fn pipeline(&self) -> PipelineContext {
        PipelineContext::new(self.conn.clone())
    }

    /// Run `f` inside one batch and commit it afterwards.
    ///
    /// Nothing is committed if `f` fails.
    pub fn batch<T>(
        &self,
        f: impl FnOnce(&mut PipelineContext) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut ctx = self.pipeline();
        let entry = ctx.enter();
        let value = f(&mut ctx)?;
        ctx.exit(entry)?;
        Ok(value)
    }

    /// The engine path for a payload-relative `path`.
    ///
    /// Absolute paths are taken relative to the payload root, so `.a` and
    /// `a` address the same place.
    pub fn engine_path(path: &JsonPath) -> Result<JsonPath, PathError> {
        let relative = if path.is_absolute() {
            path.relative_to(&JsonPath::root())?
        } else {
            path.clone()
        };
        PAYLOAD_PATH.join(&relative)
    }

    fn is_payload_root(path: &JsonPath) -> bool {
        path.len() == 0
    }

    /// Create the document with `initial` as payload unless it exists.
    ///
    /// Returns whether it already existed. The existence probe and the
    /// write are separate calls: two concurrent creators can both write,
    /// and the last one wins.
    pub fn ensure(&self, initial: JsonValue) -> Result<bool, Error> {
        if self.exists()? {
            return Ok(true);
        }
        self.write_fresh(initial)?;
        Ok(false)
    }

    /// Whether the document is present in the engine.
    pub fn exists(&self) -> Result<bool, Error> {
        Ok(self.conn.exists(&self.key)?)
    }

    /// Overwrite the whole record with `value` and fresh metadata at rev 0.
    pub fn reset(&self, value: JsonValue) -> Result<(), Error> {
        self.write_fresh(value)
    }

    fn write_fresh(&self, payload: JsonValue) -> Result<(), Error> {
        let now = self.conn.time()?;
        let record = Snapshot {
            payload,
            metadata: Metadata::fresh(self.key.clone(), now),
        };
        log::debug!("create record at key={} rev=0", self.key);
        self.conn
            .set(&self.key, &JsonPath::root(), serde_json::to_value(&record)?)?;
        Ok(())
    }

    /// The value at `path`, or `None`.
    ///
    /// `None` covers an absent document, a null value and a missing path
    /// alike; use [`lookup`](Self::lookup) to tell them apart.
    pub fn get(&self, path: impl IntoJsonPath) -> Result<Option<JsonValue>, Error> {
        match self.query(Op::Get, path) {
            Ok(reply) => Ok(reply.into_json()?.filter(|value| !value.is_null())),
            Err(error) if error.is_structural() => {
                log::debug!("get on key={} found no value: {}", self.key, error);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Like [`get`](Self::get), but reporting why there is no value.
    pub fn lookup(&self, path: impl IntoJsonPath) -> Result<Lookup, Error> {
        let path = path.into_json_path()?;
        if !self.exists()? {
            return Ok(Lookup::Absent);
        }
        let found = match self.json_type(&path) {
            Ok(found) => found,
            Err(error) if error.is_structural() => None,
            Err(error) => return Err(error),
        };
        match found {
            None => Ok(Lookup::Missing),
            Some(JsonType::Null) => Ok(Lookup::Null),
            Some(_) => match self.query(Op::Get, &path)?.into_json()? {
                Some(value) => Ok(Lookup::Value(value)),
                None => Ok(Lookup::Absent),
            },
        }
    }

    /// Write `value` at `path`.
    ///
    /// A root write on an absent document creates it at rev 0. Any other
    /// write counts as one mutation; a sub-path write on an absent document
    /// first creates it with an empty object payload.
    pub fn set(&self, value: JsonValue, path: impl IntoJsonPath) -> Result<(), Error> {
        let mut ctx = self.pipeline();
        self.set_in(&mut ctx, value, path)?;
        Ok(())
    }

    /// [`set`](Self::set) inside an outer pipeline.
    ///
    /// Document creation, when needed, is written immediately; the mutation
    /// itself is queued and commits with the outermost scope of `ctx`.
    pub fn set_in(
        &self,
        ctx: &mut PipelineContext,
        value: JsonValue,
        path: impl IntoJsonPath,
    ) -> Result<Option<Reply>, Error> {
        let path = path.into_json_path()?;
        let exists = self.exists()?;
        if Self::is_payload_root(&path) {
            if !exists {
                log::debug!("set root object at key={} on absent record", self.key);
                self.write_fresh(value)?;
                return Ok(Some(Reply::Ok));
            }
        } else if !exists {
            log::debug!("create empty root object for key={} before set at {}", self.key, path);
            self.write_fresh(json!({}))?;
        }
        self.query_in(ctx, Op::Set(value), path)
    }

    /// Run `op` at payload-relative `path`.
    ///
    /// Read-only ops go straight to the engine. Mutating ops travel as one
    /// batch: bump `rev`, stamp `updated_at` with the engine clock at
    /// execution, apply the op.
    pub fn query(&self, op: Op, path: impl IntoJsonPath) -> Result<Reply, Error> {
        let mut ctx = self.pipeline();
        match self.query_in(&mut ctx, op, path)? {
            Some(reply) => Ok(reply),
            None => Ok(Reply::Nil),
        }
    }

    /// [`query`](Self::query) inside an outer pipeline.
    ///
    /// Returns `None` when the mutation was queued for an enclosing scope.
    pub fn query_in(
        &self,
        ctx: &mut PipelineContext,
        op: Op,
        path: impl IntoJsonPath,
    ) -> Result<Option<Reply>, Error> {
        let path = path.into_json_path()?;
        let engine_path = Self::engine_path(&path)?;
        log::debug!(
            "op={:?} key={} engine_path={} path={}",
            op,
            self.key,
            engine_path,
            path
        );

        if !op.is_mutating() {
            let reply = self.conn.execute(op.into_command(self.key.clone(), engine_path))?;
            return Ok(Some(reply));
        }

        // Nothing fallible between enter and exit: an entry dropped on an
        // error path would leave the context open for good.
        let triad = [
            Command::NumIncrBy {
                key: self.key.clone(),
                path: REV_PATH.clone(),
                by: 1,
            },
            Command::SetTime {
                key: self.key.clone(),
                path: UPDATED_AT_PATH.clone(),
            },
            op.into_command(self.key.clone(), engine_path),
        ];
        let entry = ctx.enter();
        let index = ctx.len() + triad.len() - 1;
        for command in triad {
            ctx.queue(command);
        }
        Ok(ctx
            .exit(entry)?
            .and_then(|mut replies| (index < replies.len()).then(|| replies.swap_remove(index))))
    }

    /// The JSON type at `path`, `None` if absent or missing.
    pub fn json_type(&self, path: impl IntoJsonPath) -> Result<Option<JsonType>, Error> {
        Ok(self.query(Op::Type, path)?.into_type()?)
    }

    /// Whether nothing but null (or nothing at all) lives at `path`.
    pub fn is_null(&self, path: impl IntoJsonPath) -> Result<bool, Error> {
        Ok(matches!(self.json_type(path)?, None | Some(JsonType::Null)))
    }

    pub fn obj_keys(&self, path: impl IntoJsonPath) -> Result<Option<Vec<String>>, Error> {
        Ok(self.query(Op::ObjKeys, path)?.into_keys()?)
    }

    pub fn obj_len(&self, path: impl IntoJsonPath) -> Result<Option<i64>, Error> {
        Ok(self.query(Op::ObjLen, path)?.into_int()?)
    }

    pub fn arr_len(&self, path: impl IntoJsonPath) -> Result<Option<i64>, Error> {
        Ok(self.query(Op::ArrLen, path)?.into_int()?)
    }

    pub fn str_len(&self, path: impl IntoJsonPath) -> Result<Option<i64>, Error> {
        Ok(self.query(Op::StrLen, path)?.into_int()?)
    }

    /// Add `by` to the integer at `path`; returns the new value.
    pub fn num_incr_by(&self, by: i64, path: impl IntoJsonPath) -> Result<Option<i64>, Error> {
        Ok(self.query(Op::NumIncrBy(by), path)?.into_int()?)
    }

    /// Append to the array at `path`; returns its new length.
    pub fn arr_append(
        &self,
        values: Vec<JsonValue>,
        path: impl IntoJsonPath,
    ) -> Result<Option<i64>, Error> {
        Ok(self.query(Op::ArrAppend(values), path)?.into_int()?)
    }

    /// Append to the string at `path`; returns its new length.
    pub fn str_append(
        &self,
        suffix: impl Into<String>,
        path: impl IntoJsonPath,
    ) -> Result<Option<i64>, Error> {
        Ok(self.query(Op::StrAppend(suffix.into()), path)?.into_int()?)
    }

    /// The whole metadata object, `None` if the document is absent.
    pub fn get_meta(&self) -> Result<Option<Metadata>, Error> {
        let Some(raw) = self.conn.get(&self.key, &META_PATH)? else {
            return Ok(None);
        };
        let metadata: Metadata = serde_json::from_value(raw)?;
        self.check_key(&metadata)?;
        Ok(Some(metadata))
    }

    /// One metadata field such as `rev` or `updated_at`.
    pub fn get_meta_field(&self, field: &str) -> Result<Option<JsonValue>, Error> {
        let path = META_PATH.join_str(field)?;
        Ok(self.conn.get(&self.key, &path)?)
    }

    /// The current revision, `None` if the document is absent.
    pub fn revision(&self) -> Result<Option<u64>, Error> {
        match self.conn.get(&self.key, &REV_PATH)? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    /// Read payload and metadata in one call.
    pub fn snapshot(&self) -> Result<Option<Snapshot>, Error> {
        match self.conn.get(&self.key, &JsonPath::root())? {
            Some(raw) => self.decode_snapshot(raw).map(Some),
            None => Ok(None),
        }
    }

    fn decode_snapshot(&self, raw: JsonValue) -> Result<Snapshot, Error> {
        let snapshot: Snapshot = serde_json::from_value(raw)?;
        self.check_key(&snapshot.metadata)?;
        Ok(snapshot)
    }

    fn check_key(&self, metadata: &Metadata) -> Result<(), Error> {
        if metadata.key != self.key {
            return Err(Error::InconsistentKey {
                expected: self.key.clone(),
                found: metadata.key.clone(),
            });
        }
        Ok(())
    }

    /// Return `cached` if the document has not changed since, else a fresh
    /// snapshot.
    ///
    /// Only the metadata travels when nothing changed. A cached snapshot of
    /// another document is rejected with [`Error::InconsistentKey`].
    pub fn get_if_updated(&self, cached: Option<Snapshot>) -> Result<Option<Snapshot>, Error> {
        let Some(cached) = cached else {
            return self.snapshot();
        };
        self.check_key(&cached.metadata)?;
        match self.get_meta()? {
            Some(current) if cached.is_current(&current) => Ok(Some(cached)),
            Some(_) => self.snapshot(),
            None => Ok(None),
        }
    }

    /// Best-effort [`get_if_updated`](Self::get_if_updated) for polling
    /// loops: any failure is logged and yields `None`, meaning "try again
    /// later".
    pub fn poll(&self, cached: Option<Snapshot>) -> Option<Snapshot> {
        let mut ctx = self.pipeline();
        if let Some(cached) = cached {
            if cached.metadata.key != self.key {
                log::warn!(
                    "poll on key={} given a snapshot of key={}",
                    self.key,
                    cached.metadata.key
                );
                return None;
            }
            ctx.queue(Command::Get {
                key: self.key.clone(),
                path: META_PATH.clone(),
            });
            let raw = ctx.try_execute_at(0)?.into_json().ok().flatten()?;
            match serde_json::from_value::<Metadata>(raw) {
                Ok(current) if cached.is_current(&current) => return Some(cached),
                Ok(_) => {}
                Err(error) => {
                    log::warn!("poll on key={} read bad metadata: {}", self.key, error);
                    return None;
                }
            }
        }

        ctx.queue(Command::Get {
            key: self.key.clone(),
            path: JsonPath::root(),
        });
        let raw = ctx.try_execute_at(0)?.into_json().ok().flatten()?;
        match self.decode_snapshot(raw) {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                log::warn!("poll on key={} read a bad record: {}", self.key, error);
                None
            }
        }
    }

    /// How recently the document was updated, on the engine clock.
    ///
    /// Reads the clock, the metadata and the payload type in one batch.
    pub fn status(&self, threshold: Duration) -> Result<Status, Error> {
        let mut ctx = self.pipeline();
        ctx.queue(Command::Time);
        ctx.queue(Command::Get {
            key: self.key.clone(),
            path: META_PATH.clone(),
        });
        ctx.queue(Command::Type {
            key: self.key.clone(),
            path: PAYLOAD_PATH.clone(),
        });
        let mut replies = ctx.execute()?.into_iter();
        let mut next = || replies.next().unwrap_or(Reply::Nil);

        let now = next().into_clock()?;
        let metadata: Option<Metadata> = match next().into_json()? {
            Some(raw) => Some(serde_json::from_value(raw)?),
            None => None,
        };
        let has_value = !matches!(next().into_type()?, None | Some(JsonType::Null));
        Ok(Status::classify(metadata.as_ref(), has_value, now, threshold))
    }
}
