use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::models::now_timestamp;
use super::{DataError, DataStore};
use crate::filter::{Filter, FilterError, Row, SortDirection};

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

/// Tables held in process memory. Rows get an auto-increment `id` and a
/// `created_at` timestamp when the caller does not supply them.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    filter.filters().iter().all(|(column, expected)| {
        let actual = row.get(column).unwrap_or(&Value::Null);
        match (actual, expected) {
            (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (a, b) => a == b,
        }
    })
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

fn select(table: Option<&Table>, filter: &Filter) -> Vec<Row> {
    let Some(table) = table else {
        return vec![];
    };
    let mut rows: Vec<Row> = table.rows.iter().filter(|row| matches(row, filter)).cloned().collect();
    rows.sort_by(|a, b| {
        for order in filter.ordering() {
            let left = a.get(&order.column).unwrap_or(&Value::Null);
            let right = b.get(&order.column).unwrap_or(&Value::Null);
            let ordering = match order.sort {
                SortDirection::Asc => compare_values(left, right),
                SortDirection::Desc => compare_values(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    let offset = filter.offset_value() as usize;
    let limit = filter.limit_value().map(|l| l as usize).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn fetch_all(&self, filter: &Filter) -> Result<Vec<Row>, DataError> {
        filter.validate()?;
        let tables = self.tables.read().await;
        Ok(select(tables.get(filter.table_name()), filter))
    }

    async fn count(&self, filter: &Filter) -> Result<u64, DataError> {
        filter.validate()?;
        let tables = self.tables.read().await;
        let count = tables
            .get(filter.table_name())
            .map(|table| table.rows.iter().filter(|row| matches(row, filter)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, DataError> {
        Filter::new(table).validate()?;
        if row.is_empty() {
            return Err(FilterError::EmptyRow(table.to_string()).into());
        }
        let mut tables = self.tables.write().await;
        let table = tables.entry(table.to_string()).or_default();

        match row.get("id").and_then(Value::as_i64) {
            Some(id) => table.next_id = table.next_id.max(id),
            None => {
                table.next_id += 1;
                row.insert("id".into(), Value::from(table.next_id));
            }
        }
        if !row.contains_key("created_at") {
            row.insert("created_at".into(), Value::String(now_timestamp()));
        }
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, filter: &Filter, row: Row) -> Result<Vec<Row>, DataError> {
        filter.to_rest_filter_params()?;
        if row.is_empty() {
            return Err(FilterError::EmptyRow(filter.table_name().to_string()).into());
        }
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(filter.table_name()) else {
            return Ok(vec![]);
        };
        let mut updated = Vec::new();
        for stored in table.rows.iter_mut().filter(|stored| matches(stored, filter)) {
            for (column, value) in &row {
                stored.insert(column.clone(), value.clone());
            }
            updated.push(stored.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, filter: &Filter) -> Result<(), DataError> {
        filter.to_rest_filter_params()?;
        let mut tables = self.tables.write().await;
        if let Some(table) = tables.get_mut(filter.table_name()) {
            table.rows.retain(|row| !matches(row, filter));
        }
        Ok(())
    }
}
