use serde_json::Value;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::{is_identifier, quote_identifier, validate_column, FilterWhere};
use super::types::{Filters, OrderBy, Row, RowRange, SortDirection, SqlResult};

/// Table query description shared by every backend: equality filters, ordering,
/// pagination and an optional column projection.
#[derive(Debug, Clone)]
pub struct Filter {
    table_name: String,
    select_columns: Vec<String>,
    where_data: Filters,
    order_data: Vec<OrderBy>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            select_columns: vec![],
            where_data: Filters::new(),
            order_data: vec![],
            limit: None,
            offset: None,
        }
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.select_columns = columns;
        self
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_data.insert(column.into(), value.into());
        self
    }

    pub fn where_all(mut self, filters: Filters) -> Self {
        self.where_data.extend(filters);
        self
    }

    pub fn order(mut self, column: impl Into<String>, sort: SortDirection) -> Self {
        self.order_data.push(OrderBy { column: column.into(), sort });
        self
    }

    pub fn order_desc(self, column: impl Into<String>) -> Self {
        self.order(column, SortDirection::Desc)
    }

    pub fn order_asc(self, column: impl Into<String>) -> Self {
        self.order(column, SortDirection::Asc)
    }

    pub fn limit(mut self, limit: u32, offset: Option<u32>) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn filters(&self) -> &Filters {
        &self.where_data
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_data
    }

    pub fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset_value(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        Self::validate_table_name(&self.table_name)?;
        Self::validate_select_columns(&self.select_columns)?;
        for column in self.where_data.keys() {
            validate_column(column)?;
        }
        for info in &self.order_data {
            validate_column(&info.column)?;
        }
        if self.limit == Some(0) {
            return Err(FilterError::InvalidLimit("Limit must be positive".to_string()));
        }
        Ok(())
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        self.validate()?;
        let (where_clause, params) = FilterWhere::generate(&self.where_data, 0)?;
        let order_clause = FilterOrder::generate(&self.order_data)?;

        let query = [
            format!("SELECT {}", self.build_select_clause()),
            format!("FROM {}", quote_identifier(&self.table_name)),
            if where_clause.is_empty() { String::new() } else { format!("WHERE {}", where_clause) },
            order_clause,
            self.build_limit_clause(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        Ok(SqlResult { query, params })
    }

    pub fn to_count_sql(&self) -> Result<SqlResult, FilterError> {
        self.validate()?;
        let (where_clause, params) = FilterWhere::generate(&self.where_data, 0)?;
        let table = quote_identifier(&self.table_name);
        let query = if where_clause.is_empty() {
            format!("SELECT COUNT(*) AS count FROM {}", table)
        } else {
            format!("SELECT COUNT(*) AS count FROM {} WHERE {}", table, where_clause)
        };
        Ok(SqlResult { query, params })
    }

    /// `UPDATE "t" SET "a" = $1 ... WHERE ... RETURNING *`; SET parameters come first.
    pub fn to_update_sql(&self, row: &Row) -> Result<SqlResult, FilterError> {
        self.validate()?;
        self.require_where()?;
        if row.is_empty() {
            return Err(FilterError::EmptyRow(self.table_name.clone()));
        }
        let mut params = Vec::with_capacity(row.len() + self.where_data.len());
        let mut assignments = Vec::with_capacity(row.len());
        for (column, value) in row {
            validate_column(column)?;
            params.push(value.clone());
            assignments.push(format!("{} = ${}", quote_identifier(column), params.len()));
        }
        let (where_clause, where_params) = FilterWhere::generate(&self.where_data, params.len())?;
        params.extend(where_params);

        let mut query = format!("UPDATE {} SET {}", quote_identifier(&self.table_name), assignments.join(", "));
        if !where_clause.is_empty() {
            query.push_str(&format!(" WHERE {}", where_clause));
        }
        query.push_str(" RETURNING *");
        Ok(SqlResult { query, params })
    }

    pub fn to_delete_sql(&self) -> Result<SqlResult, FilterError> {
        self.validate()?;
        self.require_where()?;
        let (where_clause, params) = FilterWhere::generate(&self.where_data, 0)?;
        let mut query = format!("DELETE FROM {}", quote_identifier(&self.table_name));
        if !where_clause.is_empty() {
            query.push_str(&format!(" WHERE {}", where_clause));
        }
        Ok(SqlResult { query, params })
    }

    /// Query parameters in the REST dialect (`select`, filters, `order`), in that order.
    pub fn to_rest_params(&self) -> Result<Vec<(String, String)>, FilterError> {
        self.validate()?;
        let mut params = vec![("select".to_string(), self.build_rest_select())];
        params.extend(FilterWhere::generate_rest(&self.where_data)?);
        if let Some(order) = FilterOrder::generate_rest(&self.order_data)? {
            params.push(("order".to_string(), order));
        }
        Ok(params)
    }

    /// Filter-only query parameters, for requests that modify rows.
    /// An empty filter set is refused so a write never hits the whole table.
    pub fn to_rest_filter_params(&self) -> Result<Vec<(String, String)>, FilterError> {
        self.validate()?;
        self.require_where()?;
        FilterWhere::generate_rest(&self.where_data)
    }

    fn require_where(&self) -> Result<(), FilterError> {
        if self.where_data.is_empty() {
            return Err(FilterError::MissingWhere(self.table_name.clone()));
        }
        Ok(())
    }

    /// Row window for the `Range` header, if any pagination applies.
    pub fn row_range(&self) -> Option<RowRange> {
        let start = self.offset.unwrap_or(0) as u64;
        match self.limit {
            Some(limit) if limit > 0 => Some(RowRange { start, end: Some(start + limit as u64 - 1) }),
            _ if start > 0 => Some(RowRange { start, end: None }),
            _ => None,
        }
    }

    fn validate_table_name(name: &str) -> Result<(), FilterError> {
        if name.is_empty() {
            return Err(FilterError::InvalidTableName("Table name cannot be empty".to_string()));
        }
        if !is_identifier(name) {
            return Err(FilterError::InvalidTableName(format!("Invalid table name format: {}", name)));
        }
        Ok(())
    }

    fn validate_select_columns(columns: &[String]) -> Result<(), FilterError> {
        for column in columns {
            if column == "*" {
                continue;
            }
            validate_column(column)?;
        }
        Ok(())
    }

    fn build_select_clause(&self) -> String {
        if self.select_columns.is_empty() || self.select_columns.iter().any(|c| c == "*") {
            "*".to_string()
        } else {
            self.select_columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ")
        }
    }

    fn build_rest_select(&self) -> String {
        if self.select_columns.is_empty() {
            "*".to_string()
        } else {
            self.select_columns.join(",")
        }
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) if o > 0 => format!("OFFSET {}", o),
            _ => String::new(),
        }
    }
}

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2) RETURNING *`.
pub fn insert_sql(table_name: &str, row: &Row) -> Result<SqlResult, FilterError> {
    Filter::validate_table_name(table_name)?;
    if row.is_empty() {
        return Err(FilterError::EmptyRow(table_name.to_string()));
    }
    let mut columns = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (column, value) in row {
        validate_column(column)?;
        columns.push(quote_identifier(column));
        params.push(value.clone());
        placeholders.push(format!("${}", params.len()));
    }
    let query = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        quote_identifier(table_name),
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(SqlResult { query, params })
}
