use serde_json::Value;

use super::error::FilterError;
use super::types::Filters;

/// Translates equality filters into a SQL predicate or into REST query parameters.
pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    /// Build `"a" = $1 AND "b" IS NULL ...`. Placeholders are numbered after `starting_param_index`.
    /// Returns an empty string when there are no filters.
    pub fn generate(filters: &Filters, starting_param_index: usize) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        let mut sql_conditions = Vec::with_capacity(filters.len());
        for (column, value) in filters {
            sql_conditions.push(filter_where.build_sql_condition(column, value)?);
        }
        Ok((sql_conditions.join(" AND "), filter_where.param_values))
    }

    /// Build `("a", "eq.1")` pairs in the REST filter dialect.
    pub fn generate_rest(filters: &Filters) -> Result<Vec<(String, String)>, FilterError> {
        filters
            .iter()
            .map(|(column, value)| {
                validate_column(column)?;
                let condition = match value {
                    Value::Null => "is.null".to_string(),
                    other => format!("eq.{}", rest_literal(column, other)?),
                };
                Ok((column.clone(), condition))
            })
            .collect()
    }

    fn build_sql_condition(&mut self, column: &str, value: &Value) -> Result<String, FilterError> {
        validate_column(column)?;
        let quoted_column = quote_identifier(column);
        match value {
            Value::Null => Ok(format!("{} IS NULL", quoted_column)),
            Value::Array(_) | Value::Object(_) => Err(FilterError::UnsupportedValue(column.to_string())),
            scalar => Ok(format!("{} = {}", quoted_column, self.param(scalar.clone()))),
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

fn rest_literal(column: &str, value: &Value) -> Result<String, FilterError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(FilterError::UnsupportedValue(column.to_string())),
    }
}

/// Identifiers must look like `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_column(name: &str) -> Result<(), FilterError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", name)))
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
