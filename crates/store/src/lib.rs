//! dm-store: StorageClient implementations for the dm client
//!
//! Provides the local filesystem client, the S3-compatible object-store
//! client (backed by aws-sdk-s3), and the factory that picks one based on a
//! resolved URL's scheme. Both clients offer the optional watch capability
//! through snapshot polling.

pub mod factory;
pub mod fs;
pub mod poll;
pub mod s3;

pub use factory::StoreFactory;
pub use fs::FsClient;
pub use s3::S3Client;
