//! Command execution engine for kvbridge
//!
//! This crate drives one backend connection:
//! - Connection: native handle lifecycle (open once, always close)
//! - CommandTranslator: generic key operations to native command lines
//! - CommandRegistry: per-backend command tables with arity and help
//! - Driver: blocking execution into a ResultTree, scripts, scans, interrupts
//! - Backends: Redis, memcached, redb and LMDB (feature `lmdb`)
//! - EngineConfig / ServerHistory: `kvbridge.toml` and server-info samples
//!
//! Nothing here spawns threads; the executor crate runs drivers on a
//! dedicated worker.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod args;
pub mod backend;
pub mod backends;
pub mod config;
pub mod connection;
pub mod driver;
pub mod glob;
pub mod history;
pub mod registry;
pub mod translator;

pub use backend::{Backend, Config, Handle};
pub use config::{EngineConfig, HistoryConfig, CONFIG_FILE_NAME};
pub use connection::{Connection, NativeConnector};
pub use driver::{Driver, DriverEvent, DriverOptions, DriverState, ScriptOptions};
pub use history::ServerHistory;
pub use registry::{CommandContext, CommandHandler, CommandHolder, CommandRegistry, INFINITE_ARGS};
pub use translator::{CommandTranslator, PlainTranslator};
