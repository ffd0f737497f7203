//! Concrete backends
//!
//! Each submodule provides a [`Backend`](crate::Backend) implementation with
//! its connector, translator and command table:
//!
//! | Backend | Transport | Databases |
//! |---------|-----------|-----------|
//! | [`redis::Redis`] | RESP2 over TCP | `0..n` |
//! | [`memcached::Memcached`] | text protocol over TCP | `default` |
//! | [`redb::Redb`] | one redb file | tables |
//! | [`lmdb::Lmdb`] | LMDB environment (feature `lmdb`) | named databases |

pub mod embedded;
#[cfg(feature = "lmdb")]
pub mod lmdb;
pub mod memcached;
pub(crate) mod net;
pub mod redb;
pub mod redis;

#[cfg(feature = "lmdb")]
pub use lmdb::{Lmdb, LmdbConfig};
pub use memcached::{Memcached, MemcachedConfig};
pub use self::redb::{Redb, RedbConfig};
pub use redis::{Redis, RedisConfig};
