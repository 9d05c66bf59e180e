//! An in-process JSON key-value engine.
//!
//! Implements the full [`Engine`] contract over a map of JSON values guarded
//! by a mutex. Batches run under one lock acquisition and are rolled back as
//! a whole when any command in them fails, so other handles never observe a
//! half-applied batch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;

use jsonipc_core::{Clock, Command, Engine, EngineError, JsonPath, JsonType, Reply};

use crate::json_utils;

/// The engine's server clock.
///
/// Readings come from the wall clock plus a test-controlled offset and are
/// strictly increasing: two reads never return the same value.
struct ServerClock {
    last_micros: i64,
    offset_micros: i64,
}

impl ServerClock {
    fn read(&mut self) -> Clock {
        let wall = Utc::now()
            .timestamp_micros()
            .saturating_add(self.offset_micros);
        let now = wall.max(self.last_micros.saturating_add(1));
        self.last_micros = now;
        Clock::from_micros(now)
    }
}

/// An in-memory engine.
///
/// # Example
///
/// ```rust
/// use jsonipc_core::{json_path, Connection};
/// use jsonipc_memory::MemoryEngine;
/// use serde_json::json;
///
/// let conn = Connection::from_engine(MemoryEngine::new());
/// conn.set("k", &json_path!("."), json!({"a": 1})).unwrap();
/// assert_eq!(conn.get("k", &json_path!(".a")).unwrap(), Some(json!(1)));
/// ```
///
/// Command history is only kept by engines built with
/// [`with_history`](MemoryEngine::with_history).
pub struct MemoryEngine {
    data: Mutex<HashMap<String, JsonValue>>,
    clock: Mutex<ServerClock>,
    history: Option<Mutex<Vec<Command>>>,
    round_trips: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty engine that records every command it executes.
    pub fn with_history() -> Self {
        Self::build(Some(Mutex::new(Vec::new())))
    }

    fn build(history: Option<Mutex<Vec<Command>>>) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            clock: Mutex::new(ServerClock {
                last_micros: 0,
                offset_micros: 0,
            }),
            history,
            round_trips: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// The raw value stored under `key`.
    pub fn dump(&self, key: &str) -> Option<JsonValue> {
        lock(&self.data).get(key).cloned()
    }

    /// Store `value` under `key` directly, bypassing command handling.
    pub fn insert_raw(&self, key: impl Into<String>, value: JsonValue) {
        lock(&self.data).insert(key.into(), value);
    }

    /// Move the server clock forward.
    pub fn advance_clock(&self, by: Duration) {
        let micros = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        let mut clock = lock(&self.clock);
        clock.offset_micros = clock.offset_micros.saturating_add(micros);
    }

    /// While offline every call fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Whether this engine records command history.
    pub fn records_history(&self) -> bool {
        self.history.is_some()
    }

    /// Every command executed so far, batched or not, in order.
    ///
    /// Always empty unless built with [`with_history`](Self::with_history).
    pub fn history(&self) -> Vec<Command> {
        match &self.history {
            Some(history) => lock(history).clone(),
            None => Vec::new(),
        }
    }

    /// Number of executed commands matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        match &self.history {
            Some(history) => lock(history).iter().filter(|c| predicate(c)).count(),
            None => 0,
        }
    }

    /// Number of `execute` plus `execute_batch` calls.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Forget recorded history and round trips.
    pub fn clear_history(&self) {
        if let Some(history) = &self.history {
            lock(history).clear();
        }
        self.round_trips.store(0, Ordering::SeqCst);
    }

    fn begin(&self) -> Result<(), EngineError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::from(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "memory engine is offline",
            )));
        }
        Ok(())
    }

    fn apply(
        &self,
        data: &mut HashMap<String, JsonValue>,
        command: &Command,
    ) -> Result<Reply, EngineError> {
        if let Some(history) = &self.history {
            lock(history).push(command.clone());
        }
        match command {
            Command::Exists { key } => Ok(Reply::Bool(data.contains_key(key))),
            Command::Time => Ok(Reply::Time(lock(&self.clock).read())),
            Command::Get { key, path } => {
                let Some(tree) = data.get(key) else {
                    return Ok(Reply::Nil);
                };
                match json_utils::get_sub_tree(tree, path)? {
                    Some(value) => Ok(Reply::Json(value.clone())),
                    None => Err(EngineError::structural(format!(
                        "path '{}' does not exist in key '{}'.",
                        path, key
                    ))),
                }
            }
            Command::Type { key, path } => {
                let Some(tree) = data.get(key) else {
                    return Ok(Reply::Nil);
                };
                Ok(json_utils::get_sub_tree(tree, path)?
                    .map(|value| Reply::Type(JsonType::of(value)))
                    .unwrap_or(Reply::Nil))
            }
            Command::Set { key, path, value } => match data.get_mut(key) {
                Some(tree) => {
                    json_utils::set_path(tree, path, value.clone())?;
                    Ok(Reply::Ok)
                }
                None if path.len() == 0 => {
                    data.insert(key.clone(), value.clone());
                    Ok(Reply::Ok)
                }
                None => Err(EngineError::structural(format!(
                    "new objects must be created at the root, not at '{}'.",
                    path
                ))),
            },
            Command::SetTime { key, path } => {
                let tree = data.get_mut(key).ok_or_else(|| {
                    EngineError::structural(format!("key '{}' does not exist.", key))
                })?;
                let now = lock(&self.clock).read();
                let stamp = serde_json::to_value(now).map_err(|e| EngineError::Protocol {
                    message: e.to_string(),
                })?;
                json_utils::set_path(tree, path, stamp)?;
                Ok(Reply::Time(now))
            }
            Command::NumIncrBy { key, path, by } => {
                let target = Self::target_mut(data, key, path)?;
                let Some(current) = target.as_i64() else {
                    return Err(json_utils::wrong_type(path, JsonType::Integer, target));
                };
                let next = current.checked_add(*by).ok_or_else(|| {
                    EngineError::structural(format!("increment at '{}' overflows.", path))
                })?;
                *target = JsonValue::from(next);
                Ok(Reply::Int(next))
            }
            Command::ArrAppend { key, path, values } => {
                let target = Self::target_mut(data, key, path)?;
                match target {
                    JsonValue::Array(arr) => {
                        arr.extend(values.iter().cloned());
                        Ok(Reply::Int(arr.len() as i64))
                    }
                    other => Err(json_utils::wrong_type(path, JsonType::Array, other)),
                }
            }
            Command::StrAppend { key, path, suffix } => {
                let target = Self::target_mut(data, key, path)?;
                match target {
                    JsonValue::String(s) => {
                        s.push_str(suffix);
                        Ok(Reply::Int(s.chars().count() as i64))
                    }
                    other => Err(json_utils::wrong_type(path, JsonType::String, other)),
                }
            }
            Command::ObjKeys { key, path } => match Self::target(data, key, path)? {
                None => Ok(Reply::Nil),
                Some(JsonValue::Object(map)) => Ok(Reply::Keys(map.keys().cloned().collect())),
                Some(other) => Err(json_utils::wrong_type(path, JsonType::Object, other)),
            },
            Command::ObjLen { key, path } => match Self::target(data, key, path)? {
                None => Ok(Reply::Nil),
                Some(JsonValue::Object(map)) => Ok(Reply::Int(map.len() as i64)),
                Some(other) => Err(json_utils::wrong_type(path, JsonType::Object, other)),
            },
            Command::ArrLen { key, path } => match Self::target(data, key, path)? {
                None => Ok(Reply::Nil),
                Some(JsonValue::Array(arr)) => Ok(Reply::Int(arr.len() as i64)),
                Some(other) => Err(json_utils::wrong_type(path, JsonType::Array, other)),
            },
            Command::StrLen { key, path } => match Self::target(data, key, path)? {
                None => Ok(Reply::Nil),
                Some(JsonValue::String(s)) => Ok(Reply::Int(s.chars().count() as i64)),
                Some(other) => Err(json_utils::wrong_type(path, JsonType::String, other)),
            },
        }
    }

    fn target<'a>(
        data: &'a HashMap<String, JsonValue>,
        key: &str,
        path: &JsonPath,
    ) -> Result<Option<&'a JsonValue>, EngineError> {
        match data.get(key) {
            Some(tree) => json_utils::get_sub_tree(tree, path),
            None => Ok(None),
        }
    }

    fn target_mut<'a>(
        data: &'a mut HashMap<String, JsonValue>,
        key: &str,
        path: &JsonPath,
    ) -> Result<&'a mut JsonValue, EngineError> {
        let tree = data.get_mut(key).ok_or_else(|| {
            EngineError::structural(format!("key '{}' does not exist.", key))
        })?;
        json_utils::require_sub_tree_mut(tree, path)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn execute(&self, command: Command) -> Result<Reply, EngineError> {
        self.begin()?;
        let mut data = lock(&self.data);
        self.apply(&mut data, &command)
    }

    fn execute_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, EngineError> {
        self.begin()?;
        let mut data = lock(&self.data);

        // Saved values of every key the batch touches, for rollback.
        let mut saved: HashMap<String, Option<JsonValue>> = HashMap::new();
        for key in commands.iter().filter_map(Command::key) {
            if !saved.contains_key(key) {
                saved.insert(key.to_string(), data.get(key).cloned());
            }
        }

        let mut replies = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            match self.apply(&mut data, command) {
                Ok(reply) => replies.push(reply),
                Err(error) => {
                    log::debug!(
                        "batch command {} ({}) failed, rolling back: {}",
                        index,
                        command,
                        error
                    );
                    for (key, value) in saved {
                        match value {
                            Some(value) => data.insert(key, value),
                            None => data.remove(&key),
                        };
                    }
                    return Err(error);
                }
            }
        }
        Ok(replies)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonipc_core::json_path;
    use serde_json::json;

    fn set(key: &str, path: &str, value: JsonValue) -> Command {
        Command::Set {
            key: key.to_string(),
            path: json_path!(path),
            value,
        }
    }

    fn get(key: &str, path: &str) -> Command {
        Command::Get {
            key: key.to_string(),
            path: json_path!(path),
        }
    }

    #[test]
    fn missing_key_reads_nil() {
        let engine = MemoryEngine::new();
        assert_eq!(engine.execute(get("k", ".")).unwrap(), Reply::Nil);
        assert_eq!(
            engine
                .execute(Command::Type {
                    key: "k".to_string(),
                    path: json_path!(".")
                })
                .unwrap(),
            Reply::Nil
        );
        assert_eq!(
            engine
                .execute(Command::Exists {
                    key: "k".to_string()
                })
                .unwrap(),
            Reply::Bool(false)
        );
    }

    #[test]
    fn new_keys_must_start_at_root() {
        let engine = MemoryEngine::new();
        let err = engine.execute(set("k", ".a", json!(1))).unwrap_err();
        assert!(err.is_structural());
        engine.execute(set("k", ".", json!({"a": 1}))).unwrap();
        assert_eq!(engine.dump("k"), Some(json!({"a": 1})));
    }

    #[test]
    fn get_missing_path_is_structural_but_type_is_nil() {
        let engine = MemoryEngine::new();
        engine.insert_raw("k", json!({"a": 1}));
        assert!(engine.execute(get("k", ".b")).unwrap_err().is_structural());
        let reply = engine
            .execute(Command::Type {
                key: "k".to_string(),
                path: json_path!(".b"),
            })
            .unwrap();
        assert_eq!(reply, Reply::Nil);
    }

    #[test]
    fn numincrby_requires_integer() {
        let engine = MemoryEngine::new();
        engine.insert_raw("k", json!({"n": 1, "s": "x"}));
        let incr = |path: &str| Command::NumIncrBy {
            key: "k".to_string(),
            path: json_path!(path),
            by: 2,
        };
        assert_eq!(engine.execute(incr(".n")).unwrap(), Reply::Int(3));
        assert!(engine.execute(incr(".s")).unwrap_err().is_structural());
        assert!(engine.execute(incr(".missing")).unwrap_err().is_structural());
    }

    #[test]
    fn introspection_commands() {
        let engine = MemoryEngine::new();
        engine.insert_raw("k", json!({"o": {"x": 1, "y": 2}, "a": [1, 2, 3], "s": "héllo"}));
        let key = "k".to_string();
        assert_eq!(
            engine
                .execute(Command::ObjKeys {
                    key: key.clone(),
                    path: json_path!(".o")
                })
                .unwrap(),
            Reply::Keys(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(
            engine
                .execute(Command::ArrLen {
                    key: key.clone(),
                    path: json_path!(".a")
                })
                .unwrap(),
            Reply::Int(3)
        );
        assert_eq!(
            engine
                .execute(Command::StrLen {
                    key: key.clone(),
                    path: json_path!(".s")
                })
                .unwrap(),
            Reply::Int(5)
        );
        assert!(engine
            .execute(Command::ObjLen {
                key,
                path: json_path!(".a")
            })
            .unwrap_err()
            .is_structural());
    }

    #[test]
    fn appends() {
        let engine = MemoryEngine::new();
        engine.insert_raw("k", json!({"a": [1], "s": "ab"}));
        let reply = engine
            .execute(Command::ArrAppend {
                key: "k".to_string(),
                path: json_path!(".a"),
                values: vec![json!(2), json!(3)],
            })
            .unwrap();
        assert_eq!(reply, Reply::Int(3));
        let reply = engine
            .execute(Command::StrAppend {
                key: "k".to_string(),
                path: json_path!(".s"),
                suffix: "cd".to_string(),
            })
            .unwrap();
        assert_eq!(reply, Reply::Int(4));
        assert_eq!(engine.dump("k"), Some(json!({"a": [1, 2, 3], "s": "abcd"})));
    }

    #[test]
    fn batch_replies_in_order() {
        let engine = MemoryEngine::new();
        let replies = engine
            .execute_batch(vec![set("k", ".", json!({})), set("k", ".a", json!(1)), get("k", ".a")])
            .unwrap();
        assert_eq!(replies, vec![Reply::Ok, Reply::Ok, Reply::Json(json!(1))]);
        assert_eq!(engine.round_trips(), 1);
    }

    #[test]
    fn failed_batch_rolls_back() {
        let engine = MemoryEngine::new();
        engine.insert_raw("k", json!({"n": 0}));
        let err = engine
            .execute_batch(vec![
                Command::NumIncrBy {
                    key: "k".to_string(),
                    path: json_path!(".n"),
                    by: 1,
                },
                set("fresh", ".", json!(1)),
                set("k", ".missing.deep", json!(1)),
            ])
            .unwrap_err();
        assert!(err.is_structural());
        assert_eq!(engine.dump("k"), Some(json!({"n": 0})));
        assert_eq!(engine.dump("fresh"), None);
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let engine = MemoryEngine::new();
        let read = || engine.execute(Command::Time).unwrap().into_clock().unwrap();
        let a = read();
        let b = read();
        assert!(b > a);

        engine.advance_clock(Duration::from_secs(60));
        let c = read();
        assert!(c.since(&b) >= Duration::from_secs(60));
    }

    #[test]
    fn offline_engine_fails_with_connection_error() {
        let engine = MemoryEngine::new();
        engine.set_offline(true);
        let err = engine.execute(Command::Time).unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
        engine.set_offline(false);
        assert!(engine.execute(Command::Time).is_ok());
    }

    #[test]
    fn settime_stamps_the_clock_at_execution() {
        let engine = MemoryEngine::new();
        engine.insert_raw("k", json!({"meta": {}}));
        let before = engine.execute(Command::Time).unwrap().into_clock().unwrap();
        let stamp = Command::SetTime {
            key: "k".to_string(),
            path: json_path!(".meta.t"),
        };
        let written = engine.execute(stamp).unwrap().into_clock().unwrap();
        assert!(written > before);
        assert_eq!(
            engine.dump("k").unwrap()["meta"]["t"],
            serde_json::to_value(written).unwrap()
        );

        let err = engine
            .execute(Command::SetTime {
                key: "missing".to_string(),
                path: json_path!(".t"),
            })
            .unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn history_is_off_by_default() {
        let engine = MemoryEngine::new();
        assert!(!engine.records_history());
        for _ in 0..100 {
            engine.execute(get("k", ".")).unwrap();
        }
        assert!(engine.history().is_empty());
        assert_eq!(engine.count(|_| true), 0);
        assert_eq!(engine.round_trips(), 100);
    }

    #[test]
    fn history_records_batched_commands() {
        let engine = MemoryEngine::with_history();
        engine
            .execute_batch(vec![set("k", ".", json!(1)), get("k", ".")])
            .unwrap();
        engine.execute(Command::Time).unwrap();
        assert_eq!(engine.history().len(), 3);
        assert_eq!(engine.count(|c| matches!(c, Command::Get { .. })), 1);
        assert_eq!(engine.round_trips(), 2);
        engine.clear_history();
        assert!(engine.history().is_empty());
        assert_eq!(engine.round_trips(), 0);
    }
}
