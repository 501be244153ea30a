//! Local filesystem client
//!
//! Maps Stat/List/Get/Put/Delete onto local path operations. Keys are
//! slash-separated paths relative to the bound URL; an empty key addresses
//! the bound path itself. Listing walks the tree depth-first in
//! lexicographic name order, matching the ordering object stores return.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use dm_core::{
    Entry, Error, NetworkOp, ObjectReader, Result, StorageClient, WatchSubscription,
};
use dm_core::url::ResolvedUrl;

use crate::poll::{DEFAULT_POLL_INTERVAL, Snapshot, SnapshotEntry, Snapshotter, spawn_poll_watcher};

const LIST_CHANNEL_CAP: usize = 256;
const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub struct FsClient {
    url: ResolvedUrl,
    root: PathBuf,
}

impl FsClient {
    pub fn new(url: ResolvedUrl) -> Self {
        let root = PathBuf::from(&url.path);
        Self { url, root }
    }

    fn absolute(&self, key: &str) -> PathBuf {
        if key.is_empty() {
            self.root.clone()
        } else {
            let mut path = self.root.clone();
            for part in key.split('/').filter(|p| !p.is_empty()) {
                path.push(part);
            }
            path
        }
    }
}

fn entry_from_metadata(key: &str, meta: &std::fs::Metadata) -> Entry {
    let mut entry = if meta.is_dir() {
        Entry::dir(key)
    } else {
        Entry::file(key, meta.len())
    };
    entry.modified = meta
        .modified()
        .ok()
        .and_then(|t| jiff::Timestamp::try_from(t).ok());
    entry
}

/// Walk `dir` in sorted name order, sending one entry per file (and one per
/// directory when not recursing into it). Unreadable children are reported
/// through the entry error slot without aborting the walk.
fn walk_sorted(
    dir: &Path,
    prefix: &str,
    recursive: bool,
    tx: &mpsc::Sender<Result<Entry>>,
) -> std::result::Result<(), ()> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            return tx
                .blocking_send(Err(Error::from(e).context(dir.display().to_string())))
                .map_err(|_| ());
        }
    };

    let mut names: Vec<PathBuf> = read_dir
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    names.sort();

    for path in names {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let key = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                tx.blocking_send(Err(Error::from(e).context(path.display().to_string())))
                    .map_err(|_| ())?;
                continue;
            }
        };

        if meta.is_dir() {
            if recursive {
                walk_sorted(&path, &key, recursive, tx)?;
            } else {
                tx.blocking_send(Ok(entry_from_metadata(&key, &meta)))
                    .map_err(|_| ())?;
            }
        } else {
            tx.blocking_send(Ok(entry_from_metadata(&key, &meta)))
                .map_err(|_| ())?;
        }
    }
    Ok(())
}

struct FsSnapshotter {
    root: PathBuf,
}

#[async_trait]
impl Snapshotter for FsSnapshotter {
    async fn snapshot(&self) -> Result<Snapshot> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut snapshot = BTreeMap::new();
            collect_snapshot(&root, "", &mut snapshot)?;
            Ok(snapshot)
        })
        .await
        .map_err(|e| Error::General(format!("snapshot task failed: {e}")))?
    }
}

fn collect_snapshot(dir: &Path, prefix: &str, out: &mut Snapshot) -> Result<()> {
    for child in std::fs::read_dir(dir)? {
        let path = child?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let key = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => continue, // raced with a concurrent delete
        };
        if meta.is_dir() {
            collect_snapshot(&path, &key, out)?;
        } else {
            out.insert(
                key,
                SnapshotEntry {
                    size: meta.len(),
                    modified: meta
                        .modified()
                        .ok()
                        .and_then(|t| jiff::Timestamp::try_from(t).ok()),
                },
            );
        }
    }
    Ok(())
}

#[async_trait]
impl StorageClient for FsClient {
    fn url(&self) -> &ResolvedUrl {
        &self.url
    }

    async fn stat(&self, key: &str) -> Result<Entry> {
        let path = self.absolute(key);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
                _ => Error::from(e),
            })?;
        Ok(entry_from_metadata(key, &meta))
    }

    async fn list(
        &self,
        recursive: bool,
        _include_incomplete: bool,
    ) -> Result<mpsc::Receiver<Result<Entry>>> {
        let root = self.absolute("");
        if !root.exists() {
            return Err(Error::NotFound(root.display().to_string()));
        }

        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAP);
        tokio::task::spawn_blocking(move || {
            let _ = walk_sorted(&root, "", recursive, &tx);
        });
        Ok(rx)
    }

    async fn get(&self, key: &str) -> Result<ObjectReader> {
        let path = self.absolute(key);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
                _ => Error::from(e),
            })?;
        let length = file.metadata().await?.len();
        Ok(ObjectReader {
            reader: Box::new(file),
            length,
            md5: None,
        })
    }

    async fn put(
        &self,
        key: &str,
        length: u64,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<()> {
        let path = self.absolute(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Reader failures carry transport classification since the source
        // may be a remote body; local file errors stay plain I/O errors so
        // a full disk is not retried.
        let mut file = tokio::fs::File::create(&path).await?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| Error::Network {
                op: NetworkOp::Read,
                message: format!("{}: {e}", path.display()),
            })?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
        }
        file.sync_all().await?;

        if written != length {
            return Err(Error::General(format!(
                "short write to {}: {written} of {length} bytes",
                path.display()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.absolute(key);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
                _ => Error::from(e),
            })
    }

    async fn watch(&self, _recursive: bool) -> Result<WatchSubscription> {
        let root = self.absolute("");
        if !root.exists() {
            return Err(Error::NotFound(root.display().to_string()));
        }
        Ok(spawn_poll_watcher(
            self.url.to_url_string(),
            DEFAULT_POLL_INTERVAL,
            Box::new(FsSnapshotter { root }),
        ))
    }
}
