use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{PgPool, Row as _};

use super::{DataError, DataStore};
use crate::filter::{insert_sql, Filter, Row, SqlResult};

/// Direct Postgres access. Every statement is wrapped so rows come back as JSON objects.
#[derive(Clone)]
pub struct SqlStore {
    pool: PgPool,
}

impl SqlStore {
    pub async fn connect(database_url: &str, max_connections: u32, timeout: Duration) -> Result<Self, DataError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await?;
        tracing::info!("Connected to Postgres (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn health_check(&self) -> Result<(), DataError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_json(&self, sql: SqlResult) -> Result<Vec<Row>, DataError> {
        let query = as_json_rows(&sql.query);
        tracing::debug!("SQL: {}", query);
        let mut q = sqlx::query(&query);
        for p in sql.params.iter() {
            q = bind_param_query(q, p);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| match row.try_get::<Value, _>("row")? {
                Value::Object(map) => Ok(map),
                other => Err(DataError::Decode(format!("expected a JSON object, got {}", other))),
            })
            .collect()
    }
}

/// `WITH t AS (<statement>) SELECT row_to_json(t) AS row FROM t`; works for
/// plain selects as well as `... RETURNING *` statements.
fn as_json_rows(statement: &str) -> String {
    format!("WITH t AS ({}) SELECT row_to_json(t) AS row FROM t", statement)
}

fn bind_param_query<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        // Timestamps travel as RFC 3339 strings; bind them typed so timestamptz columns accept them
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => q.bind(ts.with_timezone(&Utc)),
            Err(_) => q.bind(s.as_str()),
        },
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

#[async_trait]
impl DataStore for SqlStore {
    async fn fetch_all(&self, filter: &Filter) -> Result<Vec<Row>, DataError> {
        self.fetch_json(filter.to_sql()?).await
    }

    async fn count(&self, filter: &Filter) -> Result<u64, DataError> {
        let sql = filter.to_count_sql()?;
        tracing::debug!("SQL: {}", sql.query);
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = bind_param_query(q, p);
        }
        let row = q.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, DataError> {
        let mut stored = self.fetch_json(insert_sql(table, &row)?).await?;
        if stored.is_empty() {
            return Err(DataError::Decode(format!("insert into {} returned no row", table)));
        }
        Ok(stored.swap_remove(0))
    }

    async fn update(&self, filter: &Filter, row: Row) -> Result<Vec<Row>, DataError> {
        self.fetch_json(filter.to_update_sql(&row)?).await
    }

    async fn delete(&self, filter: &Filter) -> Result<(), DataError> {
        let sql = filter.to_delete_sql()?;
        tracing::debug!("SQL: {}", sql.query);
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = bind_param_query(q, p);
        }
        let result = q.execute(&self.pool).await?;
        tracing::debug!("Deleted {} rows from {}", result.rows_affected(), filter.table_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_wrapped_for_json_output() {
        let sql = Filter::new("tickets").where_eq("id", 1).to_sql().unwrap();
        assert_eq!(
            as_json_rows(&sql.query),
            "WITH t AS (SELECT * FROM \"tickets\" WHERE \"id\" = $1) SELECT row_to_json(t) AS row FROM t"
        );
    }
}
