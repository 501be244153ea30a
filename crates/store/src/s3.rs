//! S3-compatible object store client
//!
//! Wraps aws-sdk-s3 and implements the StorageClient trait from dm-core.
//! The bound URL's first path segment is the bucket, the rest is a key
//! prefix; keys passed to operations are relative to that prefix. SDK errors
//! are mapped onto the transport taxonomy so the retry layer can tell a
//! connection failure from a missing key.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use dm_core::config::HostConfig;
use dm_core::url::ResolvedUrl;
use dm_core::{Entry, Error, NetworkOp, ObjectReader, Result, StorageClient, WatchSubscription};

use crate::poll::{DEFAULT_POLL_INTERVAL, Snapshot, SnapshotEntry, Snapshotter, spawn_poll_watcher};

const LIST_CHANNEL_CAP: usize = 256;
const PUT_READ_BUF_SIZE: usize = 64 * 1024;

/// S3 client wrapper bound to one bucket and key prefix.
#[derive(Debug)]
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    url: ResolvedUrl,
    bucket: String,
    prefix: String,
}

impl S3Client {
    /// Create a client for a resolved object-store URL using the credentials
    /// of its matching host configuration.
    pub async fn new(url: ResolvedUrl, host: &HostConfig) -> Result<Self> {
        let endpoint = format!(
            "{}://{}",
            if url.secure { "https" } else { "http" },
            url.host
        );

        let (bucket, prefix) = split_bucket_prefix(&url.path);
        if bucket.is_empty() {
            return Err(Error::ClientInit {
                url: url.to_url_string(),
                message: "URL names no bucket".to_string(),
            });
        }

        let credentials = aws_credential_types::Credentials::new(
            host.access_key.clone(),
            host.secret_key.clone(),
            None, // session token
            None, // expiry
            "dm-static-credentials",
        );

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(host.region.clone()))
            .endpoint_url(&endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(host.path_style)
            .build();

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            url,
            bucket,
            prefix,
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    /// Absolute object key for a key relative to the bound prefix.
    fn full_key(&self, key: &str) -> String {
        match (self.prefix.is_empty(), key.is_empty()) {
            (true, _) => key.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{}", self.prefix, key),
        }
    }

    /// Listing prefix: the bound prefix with a trailing slash, so that
    /// `bucket/dir` lists keys under `dir/` and not `dir-other/`.
    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

fn split_bucket_prefix(path: &str) -> (String, String) {
    let trimmed = path.trim_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket.to_string(), prefix.trim_matches('/').to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Classify an SDK failure for the retry layer.
///
/// Dispatch failures are connection-level: DNS lookups that fail mention dns
/// in the connector error, everything else is a dial failure. Timeouts and
/// malformed responses count as read failures. Service errors are inspected
/// by message, the way their code surfaces through the SDK's Display.
fn map_sdk_error<E: std::error::Error>(what: &str, error: &aws_sdk_s3::error::SdkError<E>) -> Error {
    use aws_sdk_s3::error::SdkError;

    match error {
        SdkError::ServiceError(service_err) => {
            let message = format!("{}", aws_sdk_s3::error::DisplayErrorContext(service_err.err()));
            if message.contains("NotFound")
                || message.contains("NoSuchKey")
                || message.contains("NoSuchBucket")
            {
                Error::NotFound(what.to_string())
            } else if message.contains("AccessDenied")
                || message.contains("InvalidAccessKeyId")
                || message.contains("SignatureDoesNotMatch")
            {
                Error::Auth(format!("{what}: {message}"))
            } else {
                Error::General(format!("{what}: {message}"))
            }
        }
        SdkError::DispatchFailure(err) => {
            let message = format!("{err:?}");
            if message.to_ascii_lowercase().contains("dns") {
                Error::Dns(format!("{what}: {message}"))
            } else {
                Error::Network {
                    op: NetworkOp::Dial,
                    message: format!("{what}: {message}"),
                }
            }
        }
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => Error::Network {
            op: NetworkOp::Read,
            message: format!("{what}: {error}"),
        },
        _ => Error::General(format!("{what}: {error}")),
    }
}

fn timestamp_from_sdk(dt: &aws_smithy_types::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::from_second(dt.secs()).ok()
}

/// ETags of multipart uploads carry a part-count suffix and are not an MD5
/// of the content.
fn etag_is_md5(etag: &str) -> bool {
    !etag.contains('-')
}

#[async_trait]
impl StorageClient for S3Client {
    fn url(&self) -> &ResolvedUrl {
        &self.url
    }

    async fn stat(&self, key: &str) -> Result<Entry> {
        let full = self.full_key(key);
        if full.is_empty() {
            // Bound to a bare bucket.
            return Ok(Entry::dir(key));
        }

        let response = self
            .inner
            .head_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| map_sdk_error(&full, &e))?;

        let mut entry = Entry::file(key, response.content_length().unwrap_or(0) as u64);
        entry.modified = response.last_modified().and_then(timestamp_from_sdk);
        entry.etag = response
            .e_tag()
            .map(|etag| etag.trim_matches('"').to_string());
        Ok(entry)
    }

    async fn list(
        &self,
        recursive: bool,
        include_incomplete: bool,
    ) -> Result<mpsc::Receiver<Result<Entry>>> {
        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAP);
        let client = self.inner.clone();
        let bucket = self.bucket.clone();
        let list_prefix = self.list_prefix();

        tokio::spawn(async move {
            let mut continuation: Option<String> = None;

            loop {
                let mut request = client.list_objects_v2().bucket(&bucket);
                if !list_prefix.is_empty() {
                    request = request.prefix(&list_prefix);
                }
                if !recursive {
                    request = request.delimiter("/");
                }
                if let Some(token) = &continuation {
                    request = request.continuation_token(token);
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = tx.send(Err(map_sdk_error(&bucket, &e))).await;
                        return;
                    }
                };

                // One page: merge directories and objects back into key
                // order, since the SDK hands them over separately.
                let mut page = Vec::new();

                for common in response.common_prefixes() {
                    if let Some(p) = common.prefix()
                        && let Some(rel) = p.strip_prefix(&list_prefix)
                    {
                        page.push(Entry::dir(rel.trim_end_matches('/')));
                    }
                }

                for object in response.contents() {
                    let Some(key) = object.key() else { continue };
                    let Some(rel) = key.strip_prefix(&list_prefix) else {
                        continue;
                    };
                    if rel.is_empty() {
                        // The prefix itself, stored as a zero-byte marker.
                        continue;
                    }
                    let mut entry = Entry::file(rel, object.size().unwrap_or(0) as u64);
                    entry.modified = object.last_modified().and_then(timestamp_from_sdk);
                    entry.etag = object
                        .e_tag()
                        .map(|etag| etag.trim_matches('"').to_string());
                    page.push(entry);
                }

                page.sort_by(|a, b| a.key.cmp(&b.key));
                for entry in page {
                    if tx.send(Ok(entry)).await.is_err() {
                        return;
                    }
                }

                match response.next_continuation_token() {
                    Some(token) if response.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            if !include_incomplete {
                return;
            }

            // Unfinished multipart uploads, appended after the completed
            // objects.
            let mut key_marker: Option<String> = None;
            let mut upload_id_marker: Option<String> = None;

            loop {
                let mut request = client.list_multipart_uploads().bucket(&bucket);
                if !list_prefix.is_empty() {
                    request = request.prefix(&list_prefix);
                }
                if let Some(marker) = &key_marker {
                    request = request.key_marker(marker);
                }
                if let Some(marker) = &upload_id_marker {
                    request = request.upload_id_marker(marker);
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = tx.send(Err(map_sdk_error(&bucket, &e))).await;
                        return;
                    }
                };

                for upload in response.uploads() {
                    let Some(key) = upload.key() else { continue };
                    let Some(rel) = key.strip_prefix(&list_prefix) else {
                        continue;
                    };
                    let mut entry = Entry::file(rel, 0);
                    entry.modified = upload.initiated().and_then(timestamp_from_sdk);
                    if tx.send(Ok(entry)).await.is_err() {
                        return;
                    }
                }

                if response.is_truncated().unwrap_or(false) {
                    key_marker = response.next_key_marker().map(|s| s.to_string());
                    upload_id_marker = response.next_upload_id_marker().map(|s| s.to_string());
                } else {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn get(&self, key: &str) -> Result<ObjectReader> {
        let full = self.full_key(key);
        let response = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| map_sdk_error(&full, &e))?;

        let length = response.content_length().unwrap_or(0) as u64;
        let md5 = response
            .e_tag()
            .map(|etag| etag.trim_matches('"').to_string())
            .filter(|etag| etag_is_md5(etag));

        Ok(ObjectReader {
            reader: Box::new(response.body.into_async_read()),
            length,
            md5,
        })
    }

    async fn put(
        &self,
        key: &str,
        length: u64,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<()> {
        let full = self.full_key(key);

        // Hash while buffering so the upload carries a known length and the
        // returned ETag can be verified against what was actually read. The
        // whole object sits in memory, which caps the practical object size;
        // anything larger needs a multipart upload path.
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<bytes::Bytes>(16);
        let hasher = tokio::spawn(async move {
            let mut context = md5::Context::new();
            while let Some(chunk) = chunk_rx.recv().await {
                context.consume(&chunk);
            }
            format!("{:x}", context.compute())
        });

        let mut body = Vec::with_capacity(length as usize);
        let mut buf = vec![0u8; PUT_READ_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| Error::Network {
                op: NetworkOp::Read,
                message: format!("{full}: {e}"),
            })?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
            if chunk_tx
                .send(bytes::Bytes::copy_from_slice(&buf[..n]))
                .await
                .is_err()
            {
                break;
            }
        }
        drop(chunk_tx);

        let computed = hasher
            .await
            .map_err(|e| Error::General(format!("hash task failed: {e}")))?;

        if body.len() as u64 != length {
            return Err(Error::General(format!(
                "short read for {full}: {} of {length} bytes",
                body.len()
            )));
        }

        let mut request = self
            .inner
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .content_length(length as i64)
            .body(aws_sdk_s3::primitives::ByteStream::from(body));

        if let Some(mime) = mime_guess::from_path(&full).first() {
            request = request.content_type(mime.essence_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(&full, &e))?;

        if let Some(etag) = response.e_tag() {
            let etag = etag.trim_matches('"');
            if etag_is_md5(etag) && etag != computed {
                return Err(Error::Integrity {
                    expected: etag.to_string(),
                    computed,
                });
            }
        }

        tracing::debug!(key = %full, length, "uploaded object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        self.inner
            .delete_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| map_sdk_error(&full, &e))?;
        Ok(())
    }

    async fn watch(&self, _recursive: bool) -> Result<WatchSubscription> {
        Ok(spawn_poll_watcher(
            self.url.to_url_string(),
            DEFAULT_POLL_INTERVAL,
            Box::new(S3Snapshotter {
                client: self.inner.clone(),
                bucket: self.bucket.clone(),
                list_prefix: self.list_prefix(),
            }),
        ))
    }
}

struct S3Snapshotter {
    client: aws_sdk_s3::Client,
    bucket: String,
    list_prefix: String,
}

#[async_trait]
impl Snapshotter for S3Snapshotter {
    async fn snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if !self.list_prefix.is_empty() {
                request = request.prefix(&self.list_prefix);
            }
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| map_sdk_error(&self.bucket, &e))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let Some(rel) = key.strip_prefix(&self.list_prefix) else {
                    continue;
                };
                if rel.is_empty() {
                    continue;
                }
                snapshot.insert(
                    rel.to_string(),
                    SnapshotEntry {
                        size: object.size().unwrap_or(0) as u64,
                        modified: object.last_modified().and_then(timestamp_from_sdk),
                    },
                );
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => return Ok(snapshot),
            }
        }
    }
}
