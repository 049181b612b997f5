//! Persistence behind one query surface.
//!
//! Every backend implements [`DataStore`] over the same [`Filter`] description.
//! Controllers talk to a [`DataClient`], which decides how failures surface:
//! reads degrade to empty results, writes report their error.

pub mod client;
pub mod error;
pub mod memory;
pub mod models;
pub mod rest;
pub mod sql;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BackendConfig, BackendKind};
use crate::filter::{Filter, Row};

pub use client::DataClient;
pub use error::DataError;
pub use memory::MemoryStore;
pub use rest::RestStore;
pub use sql::SqlStore;

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn fetch_all(&self, filter: &Filter) -> Result<Vec<Row>, DataError>;

    async fn fetch_one(&self, filter: &Filter) -> Result<Option<Row>, DataError> {
        let single = filter.clone().limit(1, None);
        Ok(self.fetch_all(&single).await?.into_iter().next())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, DataError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, DataError>;

    /// Apply `row` to every match and return the updated rows.
    async fn update(&self, filter: &Filter, row: Row) -> Result<Vec<Row>, DataError>;

    /// Matching nothing is not an error.
    async fn delete(&self, filter: &Filter) -> Result<(), DataError>;
}

/// The configured backend. Cheap to clone; handed out per request as a [`DataClient`].
#[derive(Clone)]
pub enum Backend {
    Rest(RestStore),
    Sql(SqlStore),
    Memory(Arc<MemoryStore>),
}

impl Backend {
    pub async fn connect(config: &BackendConfig) -> Result<Self, DataError> {
        match config.kind {
            BackendKind::Rest => {
                if config.url.is_empty() || config.anon_key.is_empty() {
                    return Err(DataError::Config("SUPABASE_URL and SUPABASE_ANON_KEY are required".into()));
                }
                let store = RestStore::new(&config.url, &config.anon_key, Duration::from_secs(config.timeout_secs))?;
                Ok(Backend::Rest(store))
            }
            BackendKind::Sql => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| DataError::Config("DATABASE_URL is required".into()))?;
                let store = SqlStore::connect(url, config.max_connections, Duration::from_secs(config.timeout_secs)).await?;
                Ok(Backend::Sql(store))
            }
            BackendKind::Memory => Ok(Backend::Memory(Arc::new(MemoryStore::new()))),
        }
    }

    /// Data access on behalf of one caller. The REST backend forwards the
    /// caller's access token so row-level policies apply.
    pub fn client(&self, access_token: Option<&str>, debug: bool) -> DataClient {
        let store: Arc<dyn DataStore> = match self {
            Backend::Rest(rest) => Arc::new(rest.with_token(access_token)),
            Backend::Sql(sql) => Arc::new(sql.clone()),
            Backend::Memory(memory) => memory.clone(),
        };
        DataClient::new(store, debug)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Rest(_) => BackendKind::Rest,
            Backend::Sql(_) => BackendKind::Sql,
            Backend::Memory(_) => BackendKind::Memory,
        }
    }

    pub async fn health_check(&self) -> Result<(), DataError> {
        match self {
            Backend::Rest(rest) => rest.health_check().await,
            Backend::Sql(sql) => sql.health_check().await,
            Backend::Memory(_) => Ok(()),
        }
    }
}
