//! kvbridge - one command engine over Redis, memcached, redb and LMDB
//!
//! kvbridge runs textual key-value commands against heterogeneous stores
//! through a single pipeline: post a request, receive progress, a result
//! tree and key-change events, then exactly one response.
//!
//! # Quick Start
//!
//! ```ignore
//! use kvbridge::{backends::RedbConfig, BackendConfig, ConnectionSettings, EngineConfig, Server, Verb};
//!
//! let settings = ConnectionSettings::new("local", BackendConfig::Redb(RedbConfig::new("data.redb")));
//! let (server, events) = Server::start(settings, EngineConfig::default())?;
//! server.submit(Verb::Connect)?;
//! server.submit(Verb::execute("SET user:1 alice\nGET user:1"))?;
//! ```
//!
//! # Architecture
//!
//! Every request goes through a [`Server`], whose worker thread owns the
//! backend driver. Backend internals (translators, command tables, native
//! handles) live in `kvbridge-engine` and are not re-exported beyond their
//! configuration types.

// Re-export the public API from kvbridge-executor
pub use kvbridge_executor::*;
