//! Core types for kvbridge
//!
//! This crate defines the types every other kvbridge crate speaks:
//! - NKey / NDbKValue: keys with optional namespace separator, key/value/TTL triples
//! - NValue / ValueType: tagged union over backend reply shapes
//! - Error / ErrorKind: the engine's error vocabulary
//! - ResultTree: arena of reply nodes with observer notifications
//! - Descriptive types: database listings, server info, key-change events

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod tree;
pub mod types;
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use key::{NDbKValue, NKey, Ttl, EXPIRED_TTL, NO_TTL};
pub use tree::{CommandInfo, Node, NodeId, NodeKind, ResultTree, TreeObserver};
pub use types::{
    CommandLoggingType, ConnectionType, DatabaseContent, DatabaseInfo, DiscoveryInfo, KeyEntry,
    KeyEvent, ScanPage, ServerInfo, ServerInfoSnapshot,
};
pub use value::{NValue, ValueType};
