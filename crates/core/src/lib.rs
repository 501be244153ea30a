//! dm-core: Core library for the dm data-movement client
//!
//! This crate provides the storage-agnostic core of the dm CLI:
//! - Alias and host-credential configuration
//! - URL resolution into filesystem / object-store locations
//! - The StorageClient trait and event watch capability
//! - The resumable session store for cp and mirror
//! - The transfer executor with checksum verification and bounded retry
//! - The streaming diff engine
//!
//! This crate is designed to be independent of any specific S3 SDK;
//! concrete clients live in dm-store.

pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod retry;
pub mod session;
pub mod transfer;
pub mod url;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::{
    ClientFactory, Entry, EventKind, ObjectReader, StorageClient, WatchEvent, WatchSubscription,
};
pub use config::{Config, ConfigStore, HostConfig};
pub use diff::{DiffEntry, DiffKind, DiffOptions, diff_trees};
pub use error::{Error, NetworkOp, Result};
pub use retry::{RetryConfig, retry_transport};
pub use session::{CommandType, Session, SessionHeader, SessionState, SessionStore};
pub use transfer::{TransferExecutor, TransferItem};
pub use url::{ResolvedUrl, UrlScheme, is_url_recursive, resolve, strip_recursive_url};
pub use watcher::Watcher;
