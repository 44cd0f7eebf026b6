//! An asynchronous action cache for UI rendering hosts.
//!
//! Each [`AsyncAction`] wraps one asynchronous operation. Its results are cached in an
//! [`AsyncCache`] under a key derived from the arguments, concurrent requests for the same key
//! share one execution, and watchers are notified whenever the entry for their key changes.
//! A [`Snapshot`] carries the cache from a server render to the client session.

mod action;
mod cache;
mod error;
mod key;
mod result;
mod snapshot;
mod stores;
mod subscription;
mod utils;

pub use action::*;
pub use cache::{AsyncCache, AsyncCacheBuilder, CacheEntry, DeleteOptions, ListenerId, StoredResult};
pub use error::CacheError;
pub use key::derive_key;
pub use result::{ActionResult, EndTag};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use stores::{Store, Stores};
pub use subscription::Subscription;
pub use utils::timer::{sleep, Sleep};
