//! The stored record and what readers get back from it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jsonipc_core::Clock;

/// Member of the stored record holding the user payload. Must match the
/// serde rename on [`Snapshot::payload`].
pub const PAYLOAD_FIELD: &str = "_ipc_obj";

/// Member of the stored record holding [`Metadata`]. Must match the serde
/// rename on [`Snapshot::metadata`].
pub const META_FIELD: &str = "_ipc_meta";

/// Bookkeeping stored next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// The storage key the record lives under.
    pub key: String,
    /// Starts at 0 and grows by one per mutation.
    pub rev: u64,
    pub created_at: Clock,
    pub updated_at: Clock,
}

impl Metadata {
    /// Metadata for a freshly written record.
    pub fn fresh(key: impl Into<String>, now: Clock) -> Self {
        Self {
            key: key.into(),
            rev: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A full copy of a document: payload plus metadata.
///
/// This is also the exact on-engine layout of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_ipc_obj")]
    pub payload: JsonValue,
    #[serde(rename = "_ipc_meta")]
    pub metadata: Metadata,
}

impl Snapshot {
    pub fn rev(&self) -> u64 {
        self.metadata.rev
    }

    /// Whether `metadata` describes the same revision of the same record.
    pub fn is_current(&self, metadata: &Metadata) -> bool {
        self.metadata.rev == metadata.rev && self.metadata.created_at == metadata.created_at
    }
}

/// The result of a typed lookup, keeping apart the cases `get` folds into
/// "no value".
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The document has never been written.
    Absent,
    /// The document exists but nothing lives at the path.
    Missing,
    /// The path holds JSON `null`.
    Null,
    Value(JsonValue),
}

impl Lookup {
    /// Collapse into the `get` view.
    pub fn into_value(self) -> Option<JsonValue> {
        match self {
            Lookup::Value(value) => Some(value),
            Lookup::Absent | Lookup::Missing | Lookup::Null => None,
        }
    }
}

/// How fresh a document is, judged on the engine clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Absent, or the payload is null.
    NoData,
    /// Updated within the threshold.
    Active { elapsed: Duration },
    /// Not updated within the threshold.
    Stale { elapsed: Duration },
}

impl Status {
    pub fn classify(metadata: Option<&Metadata>, has_value: bool, now: Clock, threshold: Duration) -> Self {
        let Some(metadata) = metadata.filter(|_| has_value) else {
            return Status::NoData;
        };
        let elapsed = now.since(&metadata.updated_at);
        if elapsed < threshold {
            Status::Active { elapsed }
        } else {
            Status::Stale { elapsed }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Status::Active { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_layout() {
        let snapshot = Snapshot {
            payload: json!({"a": 1}),
            metadata: Metadata::fresh("_ipc_x", Clock::new(3, 4)),
        };
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({
                "_ipc_obj": {"a": 1},
                "_ipc_meta": {
                    "key": "_ipc_x",
                    "rev": 0,
                    "created_at": [3, 4],
                    "updated_at": [3, 4],
                }
            })
        );
    }

    #[test]
    fn field_constants_match_layout() {
        let snapshot = Snapshot {
            payload: json!(1),
            metadata: Metadata::fresh("k", Clock::new(0, 0)),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        let record = value.as_object().unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record[PAYLOAD_FIELD], json!(1));
        assert_eq!(record[META_FIELD]["key"], json!("k"));
    }

    #[test]
    fn is_current_checks_rev_and_creation() {
        let meta = Metadata::fresh("k", Clock::new(1, 0));
        let snapshot = Snapshot {
            payload: json!(null),
            metadata: meta.clone(),
        };
        assert!(snapshot.is_current(&meta));

        let bumped = Metadata { rev: 1, ..meta.clone() };
        assert!(!snapshot.is_current(&bumped));

        let recreated = Metadata {
            created_at: Clock::new(2, 0),
            ..meta
        };
        assert!(!snapshot.is_current(&recreated));
    }

    #[test]
    fn lookup_collapses() {
        assert_eq!(Lookup::Absent.into_value(), None);
        assert_eq!(Lookup::Null.into_value(), None);
        assert_eq!(Lookup::Value(json!(1)).into_value(), Some(json!(1)));
    }

    #[test]
    fn status_classification() {
        let meta = Metadata::fresh("k", Clock::new(10, 0));
        let threshold = Duration::from_secs(3);

        assert_eq!(
            Status::classify(None, false, Clock::new(11, 0), threshold),
            Status::NoData
        );
        assert_eq!(
            Status::classify(Some(&meta), false, Clock::new(11, 0), threshold),
            Status::NoData
        );
        assert_eq!(
            Status::classify(Some(&meta), true, Clock::new(11, 0), threshold),
            Status::Active {
                elapsed: Duration::from_secs(1)
            }
        );
        assert_eq!(
            Status::classify(Some(&meta), true, Clock::new(20, 0), threshold),
            Status::Stale {
                elapsed: Duration::from_secs(10)
            }
        );
    }
}
