//! In-memory storage backend for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::client::{ClientFactory, Entry, ObjectReader, StorageClient};
use crate::error::{Error, Result};
use crate::url::ResolvedUrl;

#[derive(Debug, Default)]
struct MemState {
    objects: BTreeMap<String, Vec<u8>>,
    hashes: BTreeMap<String, String>,
    fail_next_puts: u32,
    integrity_fail: bool,
    broken_paths: Vec<String>,
}

/// Shared object map with failure injection for put operations.
#[derive(Clone, Debug, Default)]
pub struct MemBackend {
    state: Arc<Mutex<MemState>>,
    put_attempts: Arc<AtomicU32>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(path.to_string(), data.to_vec());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    /// Content hash reported when this path is read.
    pub fn set_hash(&self, path: &str, hash: &str) {
        self.state
            .lock()
            .unwrap()
            .hashes
            .insert(path.to_string(), hash.to_string());
    }

    /// The next `n` puts to any path fail with a retryable DNS error.
    pub fn fail_next_puts(&self, n: u32) {
        self.state.lock().unwrap().fail_next_puts = n;
    }

    /// Every put fails with a checksum mismatch.
    pub fn fail_puts_with_integrity(&self) {
        self.state.lock().unwrap().integrity_fail = true;
    }

    /// Puts to this exact path always fail with a retryable error.
    pub fn fail_puts_for(&self, path: &str) {
        self.state.lock().unwrap().broken_paths.push(path.to_string());
    }

    pub fn put_attempts(&self) -> u32 {
        self.put_attempts.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MemClient {
    url: ResolvedUrl,
    backend: MemBackend,
}

#[async_trait]
impl StorageClient for MemClient {
    fn url(&self) -> &ResolvedUrl {
        &self.url
    }

    async fn stat(&self, key: &str) -> Result<Entry> {
        let path = full_path(&self.url, key);
        let state = self.backend.state.lock().unwrap();
        match state.objects.get(&path) {
            Some(data) => Ok(Entry::file(key, data.len() as u64)),
            None => Err(Error::NotFound(path)),
        }
    }

    async fn list(
        &self,
        _recursive: bool,
        _include_incomplete: bool,
    ) -> Result<mpsc::Receiver<Result<Entry>>> {
        let prefix = format!("{}/", self.url.path.trim_end_matches('/'));
        let entries: Vec<Entry> = {
            let state = self.backend.state.lock().unwrap();
            state
                .objects
                .iter()
                .filter(|(path, _)| path.starts_with(&prefix))
                .map(|(path, data)| Entry::file(&path[prefix.len()..], data.len() as u64))
                .collect()
        };
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for entry in entries {
                if tx.send(Ok(entry)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn get(&self, key: &str) -> Result<ObjectReader> {
        let path = full_path(&self.url, key);
        let (data, md5) = {
            let state = self.backend.state.lock().unwrap();
            let data = state
                .objects
                .get(&path)
                .cloned()
                .ok_or_else(|| Error::NotFound(path.clone()))?;
            (data, state.hashes.get(&path).cloned())
        };
        Ok(ObjectReader {
            length: data.len() as u64,
            reader: Box::new(std::io::Cursor::new(data)),
            md5,
        })
    }

    async fn put(
        &self,
        key: &str,
        _length: u64,
        mut reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    ) -> Result<()> {
        self.backend.put_attempts.fetch_add(1, Ordering::SeqCst);
        let path = full_path(&self.url, key);

        {
            let mut state = self.backend.state.lock().unwrap();
            if state.integrity_fail {
                return Err(Error::Integrity {
                    expected: "feedface".to_string(),
                    computed: "deadbeef".to_string(),
                });
            }
            if state.broken_paths.iter().any(|p| *p == path) {
                return Err(Error::Dns("injected failure".to_string()));
            }
            if state.fail_next_puts > 0 {
                state.fail_next_puts -= 1;
                return Err(Error::Dns("injected failure".to_string()));
            }
        }

        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| Error::General(e.to_string()))?;
        self.backend.insert(&path, &data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = full_path(&self.url, key);
        self.backend.state.lock().unwrap().objects.remove(&path);
        Ok(())
    }
}

fn full_path(url: &ResolvedUrl, key: &str) -> String {
    if key.is_empty() {
        url.path.clone()
    } else {
        format!("{}/{}", url.path.trim_end_matches('/'), key)
    }
}

pub struct MemFactory {
    backend: MemBackend,
}

impl MemFactory {
    pub fn shared(backend: MemBackend) -> Arc<dyn ClientFactory> {
        Arc::new(Self { backend })
    }
}

#[async_trait]
impl ClientFactory for MemFactory {
    async fn new_client(&self, url: &ResolvedUrl) -> Result<Box<dyn StorageClient>> {
        Ok(Box::new(MemClient {
            url: url.clone(),
            backend: self.backend.clone(),
        }))
    }
}
