//! Client factory
//!
//! Maps a resolved URL onto a concrete StorageClient: filesystem paths get
//! an FsClient, object-store URLs get an S3Client built from the matching
//! host configuration.

use std::sync::Arc;

use async_trait::async_trait;

use dm_core::config::Config;
use dm_core::url::{ResolvedUrl, UrlScheme};
use dm_core::{ClientFactory, Result, StorageClient};

use crate::fs::FsClient;
use crate::s3::S3Client;

pub struct StoreFactory {
    config: Config,
}

impl StoreFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn shared(config: Config) -> Arc<dyn ClientFactory> {
        Arc::new(Self::new(config))
    }
}

#[async_trait]
impl ClientFactory for StoreFactory {
    async fn new_client(&self, url: &ResolvedUrl) -> Result<Box<dyn StorageClient>> {
        match url.scheme {
            UrlScheme::Filesystem => Ok(Box::new(FsClient::new(url.clone()))),
            UrlScheme::ObjectStore => {
                let host = self.config.host_config(&url.host)?;
                let client = S3Client::new(url.clone(), host).await?;
                Ok(Box::new(client))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_core::Error;
    use dm_core::config::HostConfig;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_filesystem_url_gets_fs_client() {
        let factory = StoreFactory::new(Config::default());
        let url = dm_core::url::resolve("/tmp/data", &BTreeMap::new()).unwrap();
        let client = factory.new_client(&url).await.unwrap();
        assert_eq!(client.url().scheme, UrlScheme::Filesystem);
    }

    #[tokio::test]
    async fn test_object_store_url_without_host_config_fails() {
        let factory = StoreFactory::new(Config::default());
        let url = dm_core::url::resolve("https://play.example.net:9000/bucket", &BTreeMap::new())
            .unwrap();
        let err = factory.new_client(&url).await.unwrap_err();
        assert!(matches!(err, Error::NoMatchingHost(_)));
    }

    #[tokio::test]
    async fn test_object_store_url_with_host_config() {
        let mut config = Config::default();
        config.hosts.insert(
            "play.example.net:9000".to_string(),
            HostConfig {
                access_key: "key".to_string(),
                secret_key: "secret".to_string(),
                region: "us-east-1".to_string(),
                path_style: true,
            },
        );

        let factory = StoreFactory::new(config);
        let url = dm_core::url::resolve("https://play.example.net:9000/bucket", &BTreeMap::new())
            .unwrap();
        let client = factory.new_client(&url).await.unwrap();
        assert_eq!(client.url().scheme, UrlScheme::ObjectStore);
    }
}
