//! S3 lister and transfer
//!
//! The configured root is `bucket[/prefix]`. Only objects directly below the
//! prefix are listed (delimiter `/`); folder placeholder keys are dropped.
//! Entry paths are object keys with the prefix removed.

use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use tributary_core::config::S3ConnectionConfig;
use tributary_core::domain::SourceEntry;
use tributary_core::ports::{IEntryLister, IRemoteTransfer};

use crate::RemoteError;

/// Bucket and normalized key prefix (empty, or ending in `/`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRoot {
    pub bucket: String,
    pub prefix: String,
}

impl BucketRoot {
    pub fn parse(root: &str) -> Result<Self, RemoteError> {
        let root = root.trim_start_matches('/');
        let (bucket, prefix) = match root.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (root, ""),
        };
        if bucket.is_empty() {
            return Err(RemoteError::InvalidRoot(root.to_string()));
        }
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        Ok(Self {
            bucket: bucket.to_string(),
            prefix,
        })
    }

    pub fn object_key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}

#[derive(Clone)]
pub struct S3Remote {
    client: Client,
}

impl S3Remote {
    /// Builds a client from the default AWS chain, overridden by `config`
    pub async fn connect(config: &S3ConnectionConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "tributary-config",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        debug!(endpoint = ?config.endpoint, "S3 client initialized");
        Self::from_client(Client::from_conf(s3_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl IEntryLister for S3Remote {
    fn protocol(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self))]
    async fn list(&self, root: &str) -> Result<Vec<SourceEntry>> {
        let root = BucketRoot::parse(root)?;
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&root.bucket)
                .prefix(&root.prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .with_context(|| format!("Failed to list s3://{}/{}", root.bucket, root.prefix))?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let Some(relative) = key.strip_prefix(root.prefix.as_str()) else {
                    continue;
                };
                if relative.is_empty() || relative.ends_with('/') {
                    continue;
                }

                let modified: DateTime<Utc> = object
                    .last_modified()
                    .and_then(|t| t.to_millis().ok())
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .unwrap_or_default();
                let size = object.size().unwrap_or(0).max(0) as u64;

                entries.push(SourceEntry::file(relative, modified, size)?);
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(bucket = %root.bucket, prefix = %root.prefix, count = entries.len(), "Listed objects");
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl IRemoteTransfer for S3Remote {
    #[instrument(skip(self, entry), fields(path = entry.path()))]
    async fn download(&self, root: &str, entry: &SourceEntry, dest: &Path) -> Result<u64> {
        let root = BucketRoot::parse(root)?;
        let key = root.object_key(entry.path());

        let response = self
            .client
            .get_object()
            .bucket(&root.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to download s3://{}/{}", root.bucket, key))?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .context("Failed to read S3 response body")?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(bytes = written, "Downloaded s3://{}/{}", root.bucket, key);
        Ok(written)
    }

    #[instrument(skip(self, entry), fields(path = entry.path()))]
    async fn delete(&self, root: &str, entry: &SourceEntry) -> Result<()> {
        let root = BucketRoot::parse(root)?;
        let key = root.object_key(entry.path());

        self.client
            .delete_object()
            .bucket(&root.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", root.bucket, key))?;

        debug!("Deleted s3://{}/{}", root.bucket, key);
        Ok(())
    }
}
