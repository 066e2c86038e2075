//! Read interfaces over the two external stores
//!
//! The registry (config db) owns alarm definitions; the condition store
//! (cnr db) owns metric readings. The checker only needs the minimal read
//! contract expressed by the two traits here; the SQLite implementations
//! back them for the running service, tests substitute in-memory fakes.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use crate::model::{AlarmDefinition, Comparator, ConditionSample, Recipient};

/// Bound on how long a read waits on a locked database, so a slow store
/// cannot starve the evaluation cycle
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("malformed row {id}: {detail}")]
    MalformedRow { id: String, detail: String },
}

/// Alarm definitions, read wholesale once per cycle
pub trait AlarmRegistry: Send + Sync {
    fn load_definitions(&self) -> Result<Vec<AlarmDefinition>, StoreError>;
}

/// Latest condition sample per metric key
pub trait ConditionStore: Send + Sync {
    fn latest(&self, metric_key: &str) -> Result<Option<ConditionSample>, StoreError>;
}

/// Registry backed by the config database
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS alarm_definition (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                metric_key      TEXT NOT NULL,
                comparator      TEXT NOT NULL,
                threshold       REAL NOT NULL,
                recipients      TEXT NOT NULL DEFAULT '[]',
                cooldown_secs   INTEGER NOT NULL DEFAULT 300,
                debounce_cycles INTEGER NOT NULL DEFAULT 1,
                enabled         INTEGER NOT NULL DEFAULT 1
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a definition. The management surface proper is out
    /// of scope; this exists for provisioning and tests.
    pub fn upsert_definition(&self, def: &AlarmDefinition) -> Result<(), StoreError> {
        let recipients =
            serde_json::to_string(&def.recipients).map_err(|e| StoreError::MalformedRow {
                id: def.id.clone(),
                detail: e.to_string(),
            })?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO alarm_definition
             (id, name, metric_key, comparator, threshold, recipients,
              cooldown_secs, debounce_cycles, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                def.id,
                def.name,
                def.metric_key,
                def.comparator.symbol(),
                def.threshold,
                recipients,
                def.cooldown_secs,
                def.debounce_cycles,
                def.enabled,
            ],
        )?;
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "UPDATE alarm_definition SET enabled = ?1 WHERE id = ?2",
            rusqlite::params![enabled, id],
        )?;
        Ok(())
    }
}

impl AlarmRegistry for SqliteRegistry {
    fn load_definitions(&self) -> Result<Vec<AlarmDefinition>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, metric_key, comparator, threshold, recipients,
                    cooldown_secs, debounce_cycles, enabled
             FROM alarm_definition ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, u64>(6)?,
                row.get::<_, u32>(7)?,
                row.get::<_, bool>(8)?,
            ))
        })?;

        let mut definitions = Vec::new();
        for row in rows {
            let (id, name, metric_key, comparator, threshold, recipients, cooldown, debounce, enabled) =
                row?;

            let comparator =
                Comparator::parse(&comparator).ok_or_else(|| StoreError::MalformedRow {
                    id: id.clone(),
                    detail: format!("unknown comparator {:?}", comparator),
                })?;
            let recipients: Vec<Recipient> =
                serde_json::from_str(&recipients).map_err(|e| StoreError::MalformedRow {
                    id: id.clone(),
                    detail: format!("bad recipients column: {}", e),
                })?;

            definitions.push(AlarmDefinition {
                id,
                name,
                metric_key,
                comparator,
                threshold,
                recipients,
                cooldown_secs: cooldown,
                debounce_cycles: debounce,
                enabled,
            });
        }

        Ok(definitions)
    }
}

/// Condition store backed by the CNR database
pub struct SqliteConditionStore {
    conn: Mutex<Connection>,
}

impl SqliteConditionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS readings (
                metric_key  TEXT NOT NULL,
                value       REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_readings_metric_time
                ON readings (metric_key, recorded_at DESC)",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one reading (the store is append-only)
    pub fn insert_reading(
        &self,
        metric_key: &str,
        value: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO readings (metric_key, value, recorded_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![metric_key, value, recorded_at.to_rfc3339()],
        )?;
        Ok(())
    }
}

impl ConditionStore for SqliteConditionStore {
    fn latest(&self, metric_key: &str) -> Result<Option<ConditionSample>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT value, recorded_at FROM readings
                 WHERE metric_key = ?1
                 ORDER BY recorded_at DESC LIMIT 1",
                [metric_key],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((value, recorded_at)) => {
                let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                    .map_err(|e| StoreError::MalformedRow {
                        id: metric_key.to_string(),
                        detail: format!("bad timestamp: {}", e),
                    })?
                    .with_timezone(&Utc);
                Ok(Some(ConditionSample {
                    metric_key: metric_key.to_string(),
                    value,
                    recorded_at,
                }))
            }
        }
    }
}

/// In-memory fakes for the store traits, shared by unit and integration tests
#[doc(hidden)]
pub mod testing {
    use super::*;

    #[derive(Default)]
    pub struct MemoryRegistry {
        definitions: Mutex<Vec<AlarmDefinition>>,
    }

    impl MemoryRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, def: AlarmDefinition) {
            let mut defs = self.definitions.lock();
            defs.retain(|d| d.id != def.id);
            defs.push(def);
        }
    }

    impl AlarmRegistry for MemoryRegistry {
        fn load_definitions(&self) -> Result<Vec<AlarmDefinition>, StoreError> {
            Ok(self.definitions.lock().clone())
        }
    }

    #[derive(Default)]
    pub struct MemoryConditions {
        samples: Mutex<HashMap<String, ConditionSample>>,
        fail: Mutex<bool>,
    }

    impl MemoryConditions {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, metric_key: &str, value: f64, recorded_at: DateTime<Utc>) {
            self.samples.lock().insert(
                metric_key.to_string(),
                ConditionSample {
                    metric_key: metric_key.to_string(),
                    value,
                    recorded_at,
                },
            );
        }

        pub fn clear(&self, metric_key: &str) {
            self.samples.lock().remove(metric_key);
        }

        /// Make every read fail, simulating an unavailable store
        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock() = fail;
        }
    }

    impl ConditionStore for MemoryConditions {
        fn latest(&self, metric_key: &str) -> Result<Option<ConditionSample>, StoreError> {
            if *self.fail.lock() {
                return Err(StoreError::Database(
                    rusqlite::Error::InvalidQuery,
                ));
            }
            Ok(self.samples.lock().get(metric_key).cloned())
        }
    }
}
