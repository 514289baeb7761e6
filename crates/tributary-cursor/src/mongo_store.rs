//! MongoDB cursor store
//!
//! One document per key: `{ _id: <key>, value: <marker> }`.

use mongodb::bson::{doc, Document};
use mongodb::options::UpdateOptions;
use mongodb::{Client, Collection};
use tracing::instrument;
use tributary_core::config::MongoStoreConfig;
use tributary_core::ports::ICursorStore;

use crate::CursorError;

pub struct MongoCursorStore {
    collection: Collection<Document>,
}

impl MongoCursorStore {
    pub async fn connect(config: &MongoStoreConfig) -> Result<Self, CursorError> {
        let client = Client::with_uri_str(&config.uri).await.map_err(|e| {
            CursorError::ConnectionFailed(format!("Failed to connect to MongoDB: {e}"))
        })?;
        let collection = client
            .database(&config.database)
            .collection::<Document>(&config.collection);

        tracing::debug!(
            database = %config.database,
            collection = %config.collection,
            "MongoDB cursor store connected"
        );

        Ok(Self { collection })
    }

    fn upsert() -> UpdateOptions {
        UpdateOptions::builder().upsert(true).build()
    }
}

fn value_of(document: Option<Document>) -> Option<String> {
    document.and_then(|d| d.get_str("value").ok().map(str::to_string))
}

#[async_trait::async_trait]
impl ICursorStore for MongoCursorStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let found = self.collection.find_one(doc! { "_id": key }, None).await?;
        Ok(value_of(found))
    }

    #[instrument(skip(self))]
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.collection
            .update_one(
                doc! { "_id": key },
                doc! { "$set": { "value": value } },
                Self::upsert(),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>> {
        let removed = self
            .collection
            .find_one_and_delete(doc! { "_id": key }, None)
            .await?;
        Ok(value_of(removed))
    }

    fn supports_compare_and_set(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn put_if_absent(&self, key: &str, value: &str) -> anyhow::Result<Option<String>> {
        loop {
            let result = self
                .collection
                .update_one(
                    doc! { "_id": key },
                    doc! { "$setOnInsert": { "value": value } },
                    Self::upsert(),
                )
                .await?;
            if result.upserted_id.is_some() {
                return Ok(None);
            }
            if let Some(existing) = self.get(key).await? {
                return Ok(Some(existing));
            }
        }
    }

    #[instrument(skip(self))]
    async fn replace(&self, key: &str, expected: &str, value: &str) -> anyhow::Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": key, "value": expected },
                doc! { "$set": { "value": value } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_of_reads_string_field() {
        let found = doc! { "_id": "sftpSource/a.txt", "value": "1700000000000" };
        assert_eq!(value_of(Some(found)).as_deref(), Some("1700000000000"));
    }

    #[test]
    fn test_value_of_missing_or_mistyped() {
        assert!(value_of(None).is_none());
        assert!(value_of(Some(doc! { "_id": "k" })).is_none());
        assert!(value_of(Some(doc! { "_id": "k", "value": 42 })).is_none());
    }

    #[test]
    fn test_upsert_options() {
        assert_eq!(MongoCursorStore::upsert().upsert, Some(true));
    }
}
