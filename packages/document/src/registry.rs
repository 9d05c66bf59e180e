//! Named engine backends, built from configuration.
//!
//! Configuration is a JSON object like:
//! ```json
//! {
//!     "backends": {
//!         "memory": {"type": "memory"},
//!         "shared": {"type": "remote", "url": "redis://localhost:6379/0"}
//!     }
//! }
//! ```
//!
//! User configuration is merged over [`IpcConfig::default`], which provides
//! one in-process `memory` backend. Entries whose `type` is not known are
//! skipped with a warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use jsonipc_core::{Connection, Engine};
use jsonipc_memory::MemoryEngine;

use crate::document::SharedDocument;
use crate::error::Error;

/// Name of the backend present in the default configuration.
pub const DEFAULT_BACKEND: &str = "memory";

/// Configuration of one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process engine, private to this process
    Memory,
    /// Networked engine reached at `url`
    Remote { url: String },
}

impl BackendConfig {
    /// Check the fields of this entry.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            BackendConfig::Memory => Ok(()),
            BackendConfig::Remote { url } => {
                url::Url::parse(url)?;
                Ok(())
            }
        }
    }
}

/// Raw backend configuration, keyed by backend name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcConfig {
    #[serde(default)]
    pub backends: BTreeMap<String, JsonValue>,
}

impl Default for IpcConfig {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert(DEFAULT_BACKEND.to_string(), json!({"type": "memory"}));
        Self { backends }
    }
}

impl IpcConfig {
    /// An empty configuration, without the default backend.
    pub fn empty() -> Self {
        Self {
            backends: BTreeMap::new(),
        }
    }

    /// Parse `text` and merge it over the default configuration.
    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        let user: IpcConfig = serde_json::from_str(text)?;
        let mut config = Self::default();
        config.merge(user);
        Ok(config)
    }

    /// Entries in `other` replace entries of the same name.
    pub fn merge(&mut self, other: IpcConfig) {
        self.backends.extend(other.backends);
    }

    pub fn with_backend(mut self, name: impl Into<String>, config: &BackendConfig) -> Result<Self, Error> {
        self.backends.insert(name.into(), serde_json::to_value(config)?);
        Ok(self)
    }
}

/// A factory for engines from backend configurations
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &BackendConfig) -> Result<Arc<dyn Engine>, Error>;
}

/// Builds in-process engines only.
///
/// Remote backends need a factory that knows the wire protocol.
pub struct DefaultEngineFactory;

impl EngineFactory for DefaultEngineFactory {
    fn create(&self, config: &BackendConfig) -> Result<Arc<dyn Engine>, Error> {
        match config {
            BackendConfig::Memory => Ok(Arc::new(MemoryEngine::new())),
            BackendConfig::Remote { url } => Err(Error::Config {
                message: format!("no engine available for remote backend at {}", url),
            }),
        }
    }
}

/// One shared connection per configured backend.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    backends: BTreeMap<String, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &IpcConfig) -> Result<Self, Error> {
        Self::from_config_with(config, &DefaultEngineFactory)
    }

    /// Build every recognised backend in `config` with `factory`.
    ///
    /// Unrecognised entries are skipped; a recognised entry that fails to
    /// validate or build is an error.
    pub fn from_config_with<F: EngineFactory + ?Sized>(
        config: &IpcConfig,
        factory: &F,
    ) -> Result<Self, Error> {
        let mut registry = Self::new();
        for (name, raw) in &config.backends {
            let backend: BackendConfig = match serde_json::from_value(raw.clone()) {
                Ok(backend) => backend,
                Err(error) => {
                    log::warn!("ignore unsupported backend {}: {}", name, error);
                    continue;
                }
            };
            backend.validate()?;
            let engine = factory.create(&backend)?;
            log::info!("init backend {} = {:?}", name, backend);
            registry.register(name.clone(), Connection::new(engine));
        }
        Ok(registry)
    }

    /// Add or replace a backend.
    pub fn register(&mut self, name: impl Into<String>, conn: Connection) {
        self.backends.insert(name.into(), conn);
    }

    pub fn connection(&self, backend: &str) -> Option<&Connection> {
        self.backends.get(backend)
    }

    /// The document `label` on `backend`.
    pub fn document(&self, backend: &str, label: &str) -> Result<SharedDocument, Error> {
        let conn = self
            .connection(backend)
            .ok_or_else(|| Error::UnknownBackend(backend.to_string()))?;
        Ok(SharedDocument::new(conn.clone(), label))
    }

    /// Names of the configured backends, sorted.
    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingFactory(std::sync::atomic::AtomicUsize);

    impl EngineFactory for CountingFactory {
        fn create(&self, _config: &BackendConfig) -> Result<Arc<dyn Engine>, Error> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Arc::new(MemoryEngine::new()))
        }
    }

    #[test]
    fn backend_config_serde() {
        let config: BackendConfig = serde_json::from_str(r#"{"type": "memory"}"#).unwrap();
        assert_eq!(config, BackendConfig::Memory);

        let config: BackendConfig =
            serde_json::from_str(r#"{"type": "remote", "url": "redis://localhost:6379"}"#)
                .unwrap();
        assert_eq!(
            config,
            BackendConfig::Remote {
                url: "redis://localhost:6379".to_string()
            }
        );
        assert_eq!(
            serde_json::to_value(&BackendConfig::Memory).unwrap(),
            json!({"type": "memory"})
        );
    }

    #[test]
    fn remote_url_is_validated() {
        let bad = BackendConfig::Remote {
            url: "not a url".to_string(),
        };
        assert!(matches!(bad.validate(), Err(Error::UrlParse(_))));
    }

    #[test]
    fn default_config_has_memory_backend() {
        let registry = Registry::from_config(&IpcConfig::default()).unwrap();
        assert_eq!(registry.backends().collect::<Vec<_>>(), vec!["memory"]);
    }

    #[test]
    fn user_config_merges_over_defaults() {
        let config = IpcConfig::from_json_str(r#"{"backends": {"cache": {"type": "memory"}}}"#)
            .unwrap();
        let registry = Registry::from_config(&config).unwrap();
        assert_eq!(
            registry.backends().collect::<Vec<_>>(),
            vec!["cache", "memory"]
        );

        let config = IpcConfig::from_json_str("{}").unwrap();
        assert_eq!(config, IpcConfig::default());
    }

    #[test]
    fn unknown_backends_are_ignored() {
        let config = IpcConfig::from_json_str(
            r#"{"backends": {"file": {"rootpath": "/tmp/x"}, "mmap": {"type": "mmap"}}}"#,
        )
        .unwrap();
        let registry = Registry::from_config(&config).unwrap();
        assert_eq!(registry.backends().collect::<Vec<_>>(), vec!["memory"]);
    }

    #[test]
    fn default_factory_rejects_remote() {
        let config = IpcConfig::empty()
            .with_backend(
                "shared",
                &BackendConfig::Remote {
                    url: "redis://localhost:6379/0".to_string(),
                },
            )
            .unwrap();
        assert!(matches!(
            Registry::from_config(&config),
            Err(Error::Config { .. })
        ));

        let factory = CountingFactory(Default::default());
        let registry = Registry::from_config_with(&config, &factory).unwrap();
        assert_eq!(factory.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(registry.connection("shared").is_some());
    }

    #[test]
    fn documents_share_the_backend_connection() {
        let registry = Registry::from_config(&IpcConfig::default()).unwrap();
        let writer = registry.document("memory", "info").unwrap();
        let reader = registry.document("memory", "info").unwrap();
        writer.ensure(json!({"a": 1})).unwrap();
        assert_eq!(reader.get("a").unwrap(), Some(json!(1)));

        assert!(matches!(
            registry.document("nope", "info"),
            Err(Error::UnknownBackend(name)) if name == "nope"
        ));
    }
}
