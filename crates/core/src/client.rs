//! StorageClient trait and associated types
//!
//! A StorageClient is bound to exactly one resolved URL and exposes
//! Stat/List/Get/Put/Delete plus the optional Watch capability. Listing is
//! channel-based: a background task produces entries in lexicographic key
//! order and each entry carries its own error slot, so one unreadable entry
//! does not abort the sequence.

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::url::ResolvedUrl;

/// One listed object or directory, keyed relative to the client's bound path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<jiff::Timestamp>,
    pub etag: Option<String>,
}

impl Entry {
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            is_dir: false,
            modified: None,
            etag: None,
        }
    }

    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            is_dir: true,
            modified: None,
            etag: None,
        }
    }
}

/// An open source stream plus its known length and content hash, if any.
pub struct ObjectReader {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub length: u64,
    /// Hex MD5 of the content when the backend already knows it.
    pub md5: Option<String>,
}

/// Kind of a watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Removed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// A single create/remove notification. Never persisted.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Full URL of the affected object.
    pub path: String,
    /// URL of the client that produced the event.
    pub origin: String,
    pub kind: EventKind,
}

/// Handle to one client's watch stream.
///
/// Dropping or closing the shutdown sender tells the producing task to exit;
/// the task drops its senders on exit, which terminates both receivers.
pub struct WatchSubscription {
    events: mpsc::Receiver<WatchEvent>,
    errors: mpsc::Receiver<Error>,
    shutdown: watch::Sender<bool>,
}

impl WatchSubscription {
    pub fn new(
        events: mpsc::Receiver<WatchEvent>,
        errors: mpsc::Receiver<Error>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            events,
            errors,
            shutdown,
        }
    }

    /// Ask the producing task to stop. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Split into the event/error receivers and the shutdown handle.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<WatchEvent>,
        mpsc::Receiver<Error>,
        watch::Sender<bool>,
    ) {
        (self.events, self.errors, self.shutdown)
    }
}

/// Polymorphic storage backend bound to one URL.
#[async_trait]
pub trait StorageClient: Send + Sync + std::fmt::Debug {
    /// The URL this client was constructed for.
    fn url(&self) -> &ResolvedUrl;

    /// Stat a key relative to the bound path; "" means the bound path itself.
    async fn stat(&self, key: &str) -> Result<Entry>;

    /// List entries under the bound path in lexicographic key order.
    ///
    /// `include_incomplete` asks object stores to include unfinished
    /// multipart uploads; filesystem clients ignore it.
    async fn list(
        &self,
        recursive: bool,
        include_incomplete: bool,
    ) -> Result<mpsc::Receiver<Result<Entry>>>;

    /// Open a key for reading.
    async fn get(&self, key: &str) -> Result<ObjectReader>;

    /// Stream `length` bytes into a key, verifying integrity where the
    /// backend reports a content hash.
    async fn put(
        &self,
        key: &str,
        length: u64,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<()>;

    /// Remove a key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribe to create/remove events under the bound path.
    ///
    /// Optional capability; the default implementation reports
    /// `NoWatcherCapability`.
    async fn watch(&self, recursive: bool) -> Result<WatchSubscription> {
        let _ = recursive;
        Err(Error::NoWatcherCapability)
    }
}

/// Constructs a client for a resolved URL.
///
/// The transfer executor goes through this seam so the core stays independent
/// of concrete backends; dm-store provides the real factory.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn new_client(&self, url: &ResolvedUrl) -> Result<Box<dyn StorageClient>>;
}
