//! The command vocabulary spoken to a JSON key-value engine.
//!
//! Commands address a storage key plus an absolute [`JsonPath`] inside the
//! value stored there. Replies are typed so callers never have to guess at
//! the shape of what came back.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::EngineError;
use crate::path::JsonPath;

/// A single engine command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Whether `key` holds a value.
    Exists { key: String },
    /// The JSON value at `path`.
    Get { key: String, path: JsonPath },
    /// Replace (or insert) the value at `path`.
    Set {
        key: String,
        path: JsonPath,
        value: JsonValue,
    },
    /// The JSON type name at `path`.
    Type { key: String, path: JsonPath },
    /// Add `by` to the integer at `path`, replying with the new value.
    NumIncrBy {
        key: String,
        path: JsonPath,
        by: i64,
    },
    /// Append values to the array at `path`, replying with its new length.
    ArrAppend {
        key: String,
        path: JsonPath,
        values: Vec<JsonValue>,
    },
    /// Append to the string at `path`, replying with its new length.
    StrAppend {
        key: String,
        path: JsonPath,
        suffix: String,
    },
    /// Member names of the object at `path`.
    ObjKeys { key: String, path: JsonPath },
    /// Number of members of the object at `path`.
    ObjLen { key: String, path: JsonPath },
    /// Length of the array at `path`.
    ArrLen { key: String, path: JsonPath },
    /// Length of the string at `path`.
    StrLen { key: String, path: JsonPath },
    /// Write the engine's clock at `path`, read when the command runs.
    SetTime { key: String, path: JsonPath },
    /// The engine's clock.
    Time,
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Exists { .. } => "exists",
            Command::Get { .. } => "get",
            Command::Set { .. } => "set",
            Command::Type { .. } => "type",
            Command::NumIncrBy { .. } => "numincrby",
            Command::ArrAppend { .. } => "arrappend",
            Command::StrAppend { .. } => "strappend",
            Command::ObjKeys { .. } => "objkeys",
            Command::ObjLen { .. } => "objlen",
            Command::ArrLen { .. } => "arrlen",
            Command::StrLen { .. } => "strlen",
            Command::SetTime { .. } => "settime",
            Command::Time => "time",
        }
    }

    /// The storage key this command touches, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Exists { key }
            | Command::Get { key, .. }
            | Command::Set { key, .. }
            | Command::Type { key, .. }
            | Command::NumIncrBy { key, .. }
            | Command::ArrAppend { key, .. }
            | Command::StrAppend { key, .. }
            | Command::ObjKeys { key, .. }
            | Command::ObjLen { key, .. }
            | Command::ArrLen { key, .. }
            | Command::StrLen { key, .. }
            | Command::SetTime { key, .. } => Some(key),
            Command::Time => None,
        }
    }

    /// The sub-document path this command addresses, if any.
    pub fn path(&self) -> Option<&JsonPath> {
        match self {
            Command::Get { path, .. }
            | Command::Set { path, .. }
            | Command::Type { path, .. }
            | Command::NumIncrBy { path, .. }
            | Command::ArrAppend { path, .. }
            | Command::StrAppend { path, .. }
            | Command::ObjKeys { path, .. }
            | Command::ObjLen { path, .. }
            | Command::ArrLen { path, .. }
            | Command::StrLen { path, .. }
            | Command::SetTime { path, .. } => Some(path),
            Command::Exists { .. } | Command::Time => None,
        }
    }

    /// Whether executing this command changes stored data.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Set { .. }
                | Command::NumIncrBy { .. }
                | Command::ArrAppend { .. }
                | Command::StrAppend { .. }
                | Command::SetTime { .. }
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.key(), self.path()) {
            (Some(key), Some(path)) => write!(f, "{} {} {}", self.name(), key, path),
            (Some(key), None) => write!(f, "{} {}", self.name(), key),
            _ => f.write_str(self.name()),
        }
    }
}

/// JSON type names as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Array,
}

impl JsonType {
    /// Classify a JSON value. Integral numbers are `Integer`.
    pub fn of(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => JsonType::Null,
            JsonValue::Bool(_) => JsonType::Boolean,
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => JsonType::Integer,
            JsonValue::Number(_) => JsonType::Number,
            JsonValue::String(_) => JsonType::String,
            JsonValue::Array(_) => JsonType::Array,
            JsonValue::Object(_) => JsonType::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Object => "object",
            JsonType::Array => "array",
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for JsonType {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// A reading of the engine clock: seconds plus microseconds.
///
/// Serialises as a two-element array `[secs, micros]`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(from = "(i64, u32)", into = "(i64, u32)")]
pub struct Clock {
    pub secs: i64,
    pub micros: u32,
}

impl Clock {
    pub fn new(secs: i64, micros: u32) -> Self {
        // Carry overflowing microseconds into seconds.
        Clock {
            secs: secs.saturating_add(i64::from(micros / 1_000_000)),
            micros: micros % 1_000_000,
        }
    }

    pub fn from_micros(total: i64) -> Self {
        Clock {
            secs: total.div_euclid(1_000_000),
            micros: total.rem_euclid(1_000_000) as u32,
        }
    }

    pub fn as_micros(&self) -> i64 {
        self.secs
            .saturating_mul(1_000_000)
            .saturating_add(i64::from(self.micros))
    }

    /// Time elapsed from `earlier` to `self`, saturating at zero.
    pub fn since(&self, earlier: &Clock) -> Duration {
        let delta = self.as_micros().saturating_sub(earlier.as_micros());
        Duration::from_micros(delta.max(0) as u64)
    }
}

impl From<(i64, u32)> for Clock {
    fn from((secs, micros): (i64, u32)) -> Self {
        Clock::new(secs, micros)
    }
}

impl From<Clock> for (i64, u32) {
    fn from(clock: Clock) -> Self {
        (clock.secs, clock.micros)
    }
}

/// An engine reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Nothing there.
    Nil,
    /// A write was accepted.
    Ok,
    Bool(bool),
    Int(i64),
    Json(JsonValue),
    Type(JsonType),
    Keys(Vec<String>),
    Time(Clock),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// The JSON value carried by this reply, `None` for `Nil`.
    pub fn into_json(self) -> Result<Option<JsonValue>, EngineError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Json(value) => Ok(Some(value)),
            other => Err(other.unexpected("json")),
        }
    }

    pub fn into_bool(self) -> Result<bool, EngineError> {
        match self {
            Reply::Bool(b) => Ok(b),
            Reply::Int(i) => Ok(i != 0),
            other => Err(other.unexpected("bool")),
        }
    }

    /// The integer carried by this reply, `None` for `Nil`.
    pub fn into_int(self) -> Result<Option<i64>, EngineError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Int(i) => Ok(Some(i)),
            other => Err(other.unexpected("int")),
        }
    }

    /// The type name carried by this reply, `None` for `Nil`.
    pub fn into_type(self) -> Result<Option<JsonType>, EngineError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Type(t) => Ok(Some(t)),
            other => Err(other.unexpected("type")),
        }
    }

    pub fn into_keys(self) -> Result<Option<Vec<String>>, EngineError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Keys(keys) => Ok(Some(keys)),
            other => Err(other.unexpected("keys")),
        }
    }

    pub fn into_clock(self) -> Result<Clock, EngineError> {
        match self {
            Reply::Time(clock) => Ok(clock),
            other => Err(other.unexpected("time")),
        }
    }

    fn unexpected(&self, wanted: &str) -> EngineError {
        EngineError::Protocol {
            message: format!("expected a {} reply, got {:?}", wanted, self),
        }
    }
}
