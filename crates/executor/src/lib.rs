//! # kvbridge executor
//!
//! The public API for kvbridge: one worker thread per connection that runs
//! requests against a Redis, memcached, redb or LMDB backend and reports
//! progress, result trees and key changes as events.
//!
//! ## Quick Start
//!
//! ```text
//! use kvbridge_executor::{BackendConfig, ConnectionSettings, Server, Verb};
//! use kvbridge_engine::{backends::RedbConfig, EngineConfig};
//!
//! let settings = ConnectionSettings::new("local", BackendConfig::Redb(RedbConfig::new("data.redb")));
//! let (server, events) = Server::start(settings, EngineConfig::default())?;
//!
//! server.submit(Verb::Connect)?;
//! server.submit(Verb::execute("SET greeting hello\nGET greeting"))?;
//!
//! for event in events {
//!     // Started, Progress, RootCreated, ChildAdded, ..., Response
//! }
//! ```
//!
//! ## Event order
//!
//! | Step | Event |
//! |------|-------|
//! | post | `Started` (on the calling thread) |
//! | worker picks it up | `Progress(0)` |
//! | while running | tree events, key events, `Progress` below 100 |
//! | done | `Progress(100)`, then exactly one `Response` |

#![warn(missing_docs)]
#![warn(clippy::all)]

mod engine;
mod event;
pub mod logging;
mod output;
mod request;
mod server;

#[cfg(test)]
mod tests;

pub use engine::{AnyDriver, BackendConfig, ConnectionSettings};
pub use event::Event;
pub use output::{Outcome, Output, Response};
pub use request::{Initiator, Request, Verb};
pub use server::Server;

pub use kvbridge_core::{
    CommandLoggingType, ConnectionType, DatabaseContent, DatabaseInfo, DiscoveryInfo, Error,
    ErrorKind, KeyEntry, KeyEvent, NDbKValue, NKey, NValue, Node, NodeId, NodeKind, Result,
    ResultTree, ServerInfo, ServerInfoSnapshot, Ttl, ValueType, EXPIRED_TTL, NO_TTL,
};
pub use kvbridge_engine::{backends, EngineConfig, HistoryConfig, CONFIG_FILE_NAME};
