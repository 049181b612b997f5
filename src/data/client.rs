use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{DataError, DataStore};
use crate::filter::{Filter, Row};

/// Controller-facing data access.
///
/// Reads never fail: a backend error is logged and the read yields an empty
/// list, `None` or 0. Writes return the error so the caller can report it.
#[derive(Clone)]
pub struct DataClient {
    store: Arc<dyn DataStore>,
    debug: bool,
}

impl DataClient {
    pub fn new(store: Arc<dyn DataStore>, debug: bool) -> Self {
        Self { store, debug }
    }

    pub async fn fetch_all(&self, filter: &Filter) -> Vec<Row> {
        match self.store.fetch_all(filter).await {
            Ok(rows) => {
                tracing::debug!("fetch_all {} returned {} rows", filter.table_name(), rows.len());
                rows
            }
            Err(e) => {
                self.degraded("fetch_all", filter.table_name(), &e);
                vec![]
            }
        }
    }

    pub async fn fetch_one(&self, filter: &Filter) -> Option<Row> {
        match self.store.fetch_one(filter).await {
            Ok(row) => row,
            Err(e) => {
                self.degraded("fetch_one", filter.table_name(), &e);
                None
            }
        }
    }

    pub async fn count(&self, filter: &Filter) -> u64 {
        match self.store.count(filter).await {
            Ok(count) => count,
            Err(e) => {
                self.degraded("count", filter.table_name(), &e);
                0
            }
        }
    }

    /// Typed variant of [`fetch_all`](Self::fetch_all). Rows that do not decode are skipped.
    pub async fn fetch_all_as<T: DeserializeOwned>(&self, filter: &Filter) -> Vec<T> {
        self.fetch_all(filter)
            .await
            .into_iter()
            .filter_map(|row| self.decode(filter.table_name(), row))
            .collect()
    }

    pub async fn fetch_one_as<T: DeserializeOwned>(&self, filter: &Filter) -> Option<T> {
        let row = self.fetch_one(filter).await?;
        self.decode(filter.table_name(), row)
    }

    pub async fn insert(&self, table: &str, row: Row) -> Result<Row, DataError> {
        self.store.insert(table, row).await.map_err(|e| {
            tracing::error!("insert into {} failed: {}", table, e);
            e
        })
    }

    pub async fn update(&self, filter: &Filter, row: Row) -> Result<Vec<Row>, DataError> {
        self.store.update(filter, row).await.map_err(|e| {
            tracing::error!("update of {} failed: {}", filter.table_name(), e);
            e
        })
    }

    pub async fn delete(&self, filter: &Filter) -> Result<(), DataError> {
        self.store.delete(filter).await.map_err(|e| {
            tracing::error!("delete from {} failed: {}", filter.table_name(), e);
            e
        })
    }

    fn decode<T: DeserializeOwned>(&self, table: &str, row: Row) -> Option<T> {
        match serde_json::from_value(Value::Object(row)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Skipping undecodable {} row: {}", table, e);
                None
            }
        }
    }

    fn degraded(&self, operation: &str, table: &str, error: &DataError) {
        if self.debug {
            tracing::warn!("{} on {} failed, returning empty result: {}", operation, table, error);
        } else {
            tracing::warn!("{} on {} failed, returning empty result", operation, table);
        }
    }
}
