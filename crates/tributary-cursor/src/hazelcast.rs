//! Hazelcast cursor store over the member REST API
//!
//! There is no native Rust client, so records are read and written through
//! `/hazelcast/rest/maps/{map}/{key}` on one member. The REST endpoint group
//! must be enabled on the cluster. The API has no conditional writes, so this
//! backend does not offer put-if-absent / replace.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use tracing::instrument;
use tributary_core::config::HazelcastStoreConfig;
use tributary_core::ports::ICursorStore;

use crate::CursorError;

pub struct HazelcastCursorStore {
    client: Client,
    base_url: Url,
    map: String,
}

impl HazelcastCursorStore {
    pub fn new(config: &HazelcastStoreConfig) -> Result<Self, CursorError> {
        let base_url = Url::parse(&config.url).map_err(|e| {
            CursorError::ConnectionFailed(format!("Invalid Hazelcast URL '{}': {}", config.url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CursorError::ConnectionFailed(format!(
                "Hazelcast URL '{}' cannot be used as a base URL",
                config.url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CursorError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            map: config.map.clone(),
        })
    }

    /// `{base}/hazelcast/rest/maps/{map}/{key}` with each segment percent-encoded
    fn entry_url(&self, key: &str) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Hazelcast base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["hazelcast", "rest", "maps", self.map.as_str(), key]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl ICursorStore for HazelcastCursorStore {
    fn backend_name(&self) -> &'static str {
        "hazelcast"
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let response = self.client.get(self.entry_url(key)?).send().await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => Err(CursorError::UnexpectedResponse {
                backend: "hazelcast",
                detail: format!("GET {key} returned {status}"),
            }
            .into()),
        }
    }

    #[instrument(skip(self))]
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.entry_url(key)?)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(value.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CursorError::UnexpectedResponse {
                backend: "hazelcast",
                detail: format!("POST {key} returned {}", response.status()),
            }
            .into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>> {
        // DELETE does not return the old value
        let previous = self.get(key).await?;
        if previous.is_none() {
            return Ok(None);
        }

        let response = self.client.delete(self.entry_url(key)?).send().await?;
        if !response.status().is_success() {
            return Err(CursorError::UnexpectedResponse {
                backend: "hazelcast",
                detail: format!("DELETE {key} returned {}", response.status()),
            }
            .into());
        }
        Ok(previous)
    }
}
