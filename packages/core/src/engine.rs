//! The engine seam and the shared connection handle.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::{Clock, Command, EngineError, JsonPath, JsonType, Reply};

/// A JSON key-value engine.
///
/// This is the whole contract the document layer needs: single commands,
/// and batches that run in one round trip and reply in order.
///
/// # Object Safety
///
/// This trait is object-safe: connections hold an `Arc<dyn Engine>`.
pub trait Engine: Send + Sync {
    /// Run one command.
    fn execute(&self, command: Command) -> Result<Reply, EngineError>;

    /// Run `commands` as one batch.
    ///
    /// # Returns
    ///
    /// * `Ok(replies)` - One reply per command, in order.
    /// * `Err(EngineError)` - The batch failed; no command in it took effect.
    fn execute_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, EngineError>;
}

impl<T: Engine + ?Sized> Engine for Arc<T> {
    fn execute(&self, command: Command) -> Result<Reply, EngineError> {
        self.as_ref().execute(command)
    }

    fn execute_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, EngineError> {
        self.as_ref().execute_batch(commands)
    }
}

impl<T: Engine + ?Sized> Engine for Box<T> {
    fn execute(&self, command: Command) -> Result<Reply, EngineError> {
        self.as_ref().execute(command)
    }

    fn execute_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, EngineError> {
        self.as_ref().execute_batch(commands)
    }
}

/// A cloneable handle on one engine.
///
/// Every document created for a backend shares the same connection; cloning
/// only bumps a reference count.
#[derive(Clone)]
pub struct Connection {
    engine: Arc<dyn Engine>,
}

impl Connection {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    pub fn from_engine<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn execute(&self, command: Command) -> Result<Reply, EngineError> {
        log::debug!("engine call: {}", command);
        self.engine.execute(command)
    }

    pub fn execute_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, EngineError> {
        log::debug!("engine batch: {} command(s)", commands.len());
        let expected = commands.len();
        let replies = self.engine.execute_batch(commands)?;
        if replies.len() != expected {
            return Err(EngineError::Protocol {
                message: format!(
                    "batch of {} command(s) returned {} reply(ies)",
                    expected,
                    replies.len()
                ),
            });
        }
        Ok(replies)
    }

    pub fn exists(&self, key: &str) -> Result<bool, EngineError> {
        self.execute(Command::Exists {
            key: key.to_string(),
        })?
        .into_bool()
    }

    pub fn get(&self, key: &str, path: &JsonPath) -> Result<Option<JsonValue>, EngineError> {
        self.execute(Command::Get {
            key: key.to_string(),
            path: path.clone(),
        })?
        .into_json()
    }

    pub fn set(&self, key: &str, path: &JsonPath, value: JsonValue) -> Result<(), EngineError> {
        self.execute(Command::Set {
            key: key.to_string(),
            path: path.clone(),
            value,
        })?;
        Ok(())
    }

    pub fn json_type(&self, key: &str, path: &JsonPath) -> Result<Option<JsonType>, EngineError> {
        self.execute(Command::Type {
            key: key.to_string(),
            path: path.clone(),
        })?
        .into_type()
    }

    /// The engine's clock, the only time source documents use.
    pub fn time(&self) -> Result<Clock, EngineError> {
        self.execute(Command::Time)?.into_clock()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("engine", &Arc::as_ptr(&self.engine))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records commands and answers with canned replies.
    struct EchoEngine {
        seen: Mutex<Vec<String>>,
        short_batches: bool,
    }

    impl EchoEngine {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                short_batches: false,
            }
        }

        fn reply(command: &Command) -> Reply {
            match command {
                Command::Exists { .. } => Reply::Bool(true),
                Command::Time => Reply::Time(Clock::new(5, 0)),
                Command::Type { .. } => Reply::Type(JsonType::Object),
                Command::Get { .. } => Reply::Json(serde_json::json!({"a": 1})),
                _ => Reply::Ok,
            }
        }
    }

    impl Engine for EchoEngine {
        fn execute(&self, command: Command) -> Result<Reply, EngineError> {
            self.seen.lock().unwrap().push(command.to_string());
            Ok(Self::reply(&command))
        }

        fn execute_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, EngineError> {
            let mut replies: Vec<Reply> = commands.iter().map(Self::reply).collect();
            if self.short_batches {
                replies.pop();
            }
            Ok(replies)
        }
    }

    #[test]
    fn helpers_decode_replies() {
        let conn = Connection::from_engine(EchoEngine::new());
        let root = JsonPath::root();
        assert!(conn.exists("k").unwrap());
        assert_eq!(conn.time().unwrap(), Clock::new(5, 0));
        assert_eq!(conn.json_type("k", &root).unwrap(), Some(JsonType::Object));
        assert_eq!(
            conn.get("k", &root).unwrap(),
            Some(serde_json::json!({"a": 1}))
        );
        conn.set("k", &root, serde_json::json!(1)).unwrap();
    }

    #[test]
    fn clones_share_the_engine() {
        let engine = Arc::new(EchoEngine::new());
        let conn = Connection::new(engine.clone());
        let other = conn.clone();
        conn.exists("a").unwrap();
        other.exists("b").unwrap();
        assert_eq!(
            *engine.seen.lock().unwrap(),
            vec!["exists a".to_string(), "exists b".to_string()]
        );
        assert!(Arc::ptr_eq(conn.engine(), other.engine()));
    }

    #[test]
    fn short_batch_is_a_protocol_error() {
        let mut engine = EchoEngine::new();
        engine.short_batches = true;
        let conn = Connection::from_engine(engine);
        let err = conn
            .execute_batch(vec![Command::Time, Command::Time])
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol { .. }));
    }
}
