//! alarmd: periodic alarm evaluation and notification dispatch
//!
//! A background checker wakes on a fixed interval, evaluates every alarm
//! definition against the latest condition sample for its metric, and
//! notifies recipients over FCM push or Telegram when an alarm changes
//! state. Alarm definitions live in the config database, readings in the
//! CNR database; per-alarm state is persisted to a JSON file so restarts
//! do not re-fire alarms already in breach within their cooldown.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use alarmd::channel::ChannelSet;
//! use alarmd::checker::AlarmChecker;
//! use alarmd::config::ContacterConfig;
//! use alarmd::contacter::{Contacter, Dispatcher};
//! use alarmd::state::StateStore;
//! use alarmd::store::{AlarmRegistry, ConditionStore, SqliteConditionStore, SqliteRegistry};
//! use alarmd::worker::CheckerWorker;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(SqliteRegistry::open("config.db".as_ref())?);
//! let conditions = Arc::new(SqliteConditionStore::open("cnr.db".as_ref())?);
//! let channels = ChannelSet::from_config(&ContacterConfig::default(), Duration::from_secs(10));
//!
//! let checker = Arc::new(AlarmChecker::new(
//!     registry as Arc<dyn AlarmRegistry>,
//!     conditions as Arc<dyn ConditionStore>,
//!     Arc::new(Contacter::new(channels)) as Arc<dyn Dispatcher>,
//!     StateStore::new("state.json"),
//! )?);
//!
//! let mut worker = CheckerWorker::new(
//!     checker,
//!     Duration::from_secs(60),
//!     Duration::from_secs(300),
//!     Duration::from_secs(30),
//! );
//! worker.start();
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod checker;
pub mod config;
pub mod contacter;
pub mod model;
pub mod state;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use checker::{AlarmChecker, CycleSummary};
pub use config::ServiceConfig;
pub use contacter::{Contacter, Dispatcher};
pub use model::{AlarmDefinition, AlarmState, AlarmStatus, Comparator};
pub use worker::CheckerWorker;
