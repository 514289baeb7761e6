//! DynamoDB cursor store
//!
//! One item per key in a table with hash key `metadataKey` (string) and a
//! `metadataValue` attribute. The table is created on connect when missing.
//! Atomic operations use condition expressions.

use std::time::Duration;

use aws_sdk_dynamodb::config::{Credentials, Region};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, ReturnValue,
    ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use tracing::instrument;
use tributary_core::config::DynamoDbStoreConfig;
use tributary_core::ports::ICursorStore;

use crate::CursorError;

const KEY_ATTRIBUTE: &str = "metadataKey";
const VALUE_ATTRIBUTE: &str = "metadataValue";

/// Polls while a freshly created table becomes active
const TABLE_READY_ATTEMPTS: u32 = 30;

pub struct DynamoDbCursorStore {
    client: Client,
    table: String,
}

impl DynamoDbCursorStore {
    pub async fn connect(config: &DynamoDbStoreConfig) -> Result<Self, CursorError> {
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

        let store = Self {
            client: Client::new(&sdk_config),
            table: config.table.clone(),
        };
        store
            .ensure_table()
            .await
            .map_err(|e| CursorError::ConnectionFailed(format!("{e:#}")))?;

        tracing::debug!(table = %store.table, "DynamoDB cursor store connected");
        Ok(store)
    }

    async fn ensure_table(&self) -> anyhow::Result<()> {
        match self.client.describe_table().table_name(&self.table).send().await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(table = %self.table, "Creating cursor table");
        self.client
            .create_table()
            .table_name(&self.table)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(KEY_ATTRIBUTE)
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(KEY_ATTRIBUTE)
                    .key_type(KeyType::Hash)
                    .build()?,
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await?;

        for _ in 0..TABLE_READY_ATTEMPTS {
            let described = self
                .client
                .describe_table()
                .table_name(&self.table)
                .send()
                .await?;
            let status = described.table().and_then(|t| t.table_status());
            if status == Some(&TableStatus::Active) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        anyhow::bail!("table {} did not become active", self.table)
    }

    fn key(key: &str) -> AttributeValue {
        AttributeValue::S(key.to_string())
    }
}

fn is_not_found(
    err: &aws_sdk_dynamodb::error::SdkError<
        aws_sdk_dynamodb::operation::describe_table::DescribeTableError,
    >,
) -> bool {
    matches!(err.as_service_error(), Some(e) if e.is_resource_not_found_exception())
}

fn string_attribute(
    item: Option<&std::collections::HashMap<String, AttributeValue>>,
) -> Option<String> {
    item.and_then(|i| i.get(VALUE_ATTRIBUTE))
        .and_then(|v| v.as_s().ok())
        .cloned()
}

#[async_trait::async_trait]
impl ICursorStore for DynamoDbCursorStore {
    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(KEY_ATTRIBUTE, Self::key(key))
            .consistent_read(true)
            .send()
            .await?;
        Ok(string_attribute(output.item()))
    }

    #[instrument(skip(self))]
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .item(KEY_ATTRIBUTE, Self::key(key))
            .item(VALUE_ATTRIBUTE, AttributeValue::S(value.to_string()))
            .send()
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table)
            .key(KEY_ATTRIBUTE, Self::key(key))
            .return_values(ReturnValue::AllOld)
            .send()
            .await?;
        Ok(string_attribute(output.attributes()))
    }

    fn supports_compare_and_set(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn put_if_absent(&self, key: &str, value: &str) -> anyhow::Result<Option<String>> {
        loop {
            let result = self
                .client
                .put_item()
                .table_name(&self.table)
                .item(KEY_ATTRIBUTE, Self::key(key))
                .item(VALUE_ATTRIBUTE, AttributeValue::S(value.to_string()))
                .condition_expression("attribute_not_exists(#k)")
                .expression_attribute_names("#k", KEY_ATTRIBUTE)
                .send()
                .await;

            match result {
                Ok(_) => return Ok(None),
                Err(e)
                    if matches!(e.as_service_error(), Some(se) if se.is_conditional_check_failed_exception()) => {}
                Err(e) => return Err(e.into()),
            }

            // removed between the failed put and this read: try again
            if let Some(existing) = self.get(key).await? {
                return Ok(Some(existing));
            }
        }
    }

    #[instrument(skip(self))]
    async fn replace(&self, key: &str, expected: &str, value: &str) -> anyhow::Result<bool> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item(KEY_ATTRIBUTE, Self::key(key))
            .item(VALUE_ATTRIBUTE, AttributeValue::S(value.to_string()))
            .condition_expression("#v = :expected")
            .expression_attribute_names("#v", VALUE_ATTRIBUTE)
            .expression_attribute_values(":expected", AttributeValue::S(expected.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if matches!(e.as_service_error(), Some(se) if se.is_conditional_check_failed_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
