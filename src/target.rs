//! Task outputs: handles describing where a task's result is expected to exist.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::client::Warehouse;
use crate::storage::StorageClient;
use crate::types::BqTable;

#[async_trait]
pub trait Target: Send + Sync + std::fmt::Debug {
    async fn exists(&self) -> Result<bool>;

    /// Human-readable location, used in logs and task ids.
    fn describe(&self) -> String;
}

/// A BigQuery table, checked through an injected client.
#[derive(Debug, Clone)]
pub struct BigQueryTarget {
    pub table: BqTable,
    pub client: Arc<dyn Warehouse>,
}

impl BigQueryTarget {
    pub fn new(table: BqTable, client: Arc<dyn Warehouse>) -> Self {
        Self { table, client }
    }

    /// Same client, different table.
    #[must_use]
    pub fn with_table(&self, table: BqTable) -> Self {
        Self {
            table,
            client: Arc::clone(&self.client),
        }
    }
}

#[async_trait]
impl Target for BigQueryTarget {
    async fn exists(&self) -> Result<bool> {
        Ok(self.client.table_exists(&self.table).await?)
    }

    fn describe(&self) -> String {
        self.table.to_string()
    }
}

/// An object in storage, e.g. the destination of an extract.
#[derive(Debug, Clone)]
pub struct ObjectTarget {
    pub uri: String,
    pub storage: Arc<StorageClient>,
}

impl ObjectTarget {
    pub fn new(uri: impl Into<String>, storage: Arc<StorageClient>) -> Self {
        Self {
            uri: uri.into(),
            storage,
        }
    }
}

#[async_trait]
impl Target for ObjectTarget {
    async fn exists(&self) -> Result<bool> {
        self.storage.exists(&self.uri).await
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}
