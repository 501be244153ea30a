//! Transfer executor
//!
//! Drives a single source -> target(s) copy: opens the source stream, writes
//! it to one or more targets, and applies the bounded quadratic-backoff retry
//! policy to transport failures. Integrity verification happens inside the
//! object-store client's put path (MD5 tee against the server ETag) and is
//! never retried.
//!
//! Multi-target fan-out writes one source read to N targets through duplex
//! pipes. There is no multi-target atomicity: a target that fails after
//! retries is marked failed on its own, completed targets are not rolled
//! back.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::client::ClientFactory;
use crate::error::{Error, NetworkOp, Result};
use crate::retry::{RetryConfig, retry_transport};
use crate::url::resolve;

const TEE_BUF_SIZE: usize = 64 * 1024;

/// One source-to-target copy unit. Immutable once enqueued in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub source_url: String,
    pub target_url: String,
    pub length: u64,
    /// Hex MD5 of the source content when the enumerating client knew it.
    pub content_hash: Option<String>,
}

/// Executes copies through a client factory.
///
/// Each copy owns the clients it creates; clients are never shared between
/// concurrent mutating operations.
pub struct TransferExecutor {
    factory: Arc<dyn ClientFactory>,
    retry: RetryConfig,
}

impl TransferExecutor {
    pub fn new(factory: Arc<dyn ClientFactory>, retry: RetryConfig) -> Self {
        Self { factory, retry }
    }

    /// Copy one item, retrying transport failures.
    pub async fn copy_item(&self, item: &TransferItem) -> Result<()> {
        retry_transport(&self.retry, || self.copy_once(item)).await
    }

    async fn copy_once(&self, item: &TransferItem) -> Result<()> {
        // Item URLs were resolved before enqueueing; no aliases apply here.
        let no_aliases = BTreeMap::new();
        let source_url = resolve(&item.source_url, &no_aliases)?;
        let target_url = resolve(&item.target_url, &no_aliases)?;

        let source = self.factory.new_client(&source_url).await?;
        let target = self.factory.new_client(&target_url).await?;

        let object = source.get("").await?;
        // The hash recorded at enumeration gates the transfer, so a source
        // that drifted since then fails instead of copying silently.
        if let (Some(expected), Some(actual)) = (&item.content_hash, &object.md5)
            && expected != actual
        {
            return Err(Error::Integrity {
                expected: expected.clone(),
                computed: actual.clone(),
            });
        }
        let length = object.length;
        target
            .put("", length, object.reader)
            .await
            .map_err(|e| e.context(format!("copy {} -> {}", item.source_url, item.target_url)))
    }

    /// Write one source stream to several targets at once.
    ///
    /// The outer error is a source-side failure. Per-target results are
    /// returned in input order; targets whose first pass failed with a
    /// transport error get a fresh per-pair retried copy, which re-reads the
    /// source.
    pub async fn copy_fanout(
        &self,
        source_url: &str,
        targets: &[String],
    ) -> Result<Vec<(String, Result<()>)>> {
        let first_pass = self.fanout_once(source_url, targets).await?;

        let mut results = Vec::with_capacity(first_pass.len());
        for (target, result) in first_pass {
            match result {
                Err(e) if e.is_retryable() => {
                    tracing::warn!(target = %target, error = %e, "fan-out target failed, retrying");
                    let item = TransferItem {
                        source_url: source_url.to_string(),
                        target_url: target.clone(),
                        length: 0,
                        content_hash: None,
                    };
                    results.push((target, self.copy_item(&item).await));
                }
                other => results.push((target, other)),
            }
        }
        Ok(results)
    }

    async fn fanout_once(
        &self,
        source_url: &str,
        targets: &[String],
    ) -> Result<Vec<(String, Result<()>)>> {
        let no_aliases = BTreeMap::new();
        let resolved_source = resolve(source_url, &no_aliases)?;
        let source = self.factory.new_client(&resolved_source).await?;
        let object = source.get("").await?;
        let length = object.length;
        let mut reader = object.reader;

        let mut writers = Vec::with_capacity(targets.len());
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let resolved_target = resolve(target, &no_aliases)?;
            let (writer, remote) = tokio::io::duplex(TEE_BUF_SIZE);
            let factory = self.factory.clone();
            handles.push(tokio::spawn(async move {
                let client = factory.new_client(&resolved_target).await?;
                client.put("", length, Box::new(remote)).await
            }));
            writers.push(Some(writer));
        }

        let mut buf = vec![0u8; TEE_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| Error::Network {
                op: NetworkOp::Read,
                message: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            for slot in writers.iter_mut() {
                if let Some(writer) = slot
                    && writer.write_all(&buf[..n]).await.is_err()
                {
                    // The target task already exited; its error surfaces at
                    // join time.
                    *slot = None;
                }
            }
        }
        drop(writers);

        let mut results = Vec::with_capacity(targets.len());
        for (target, handle) in targets.iter().zip(handles) {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(Error::General(format!("target writer task failed: {e}"))),
            };
            results.push((target.clone(), result));
        }
        Ok(results)
    }
}
