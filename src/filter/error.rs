use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Unsupported filter value for column {0}: only scalars can be compared")]
    UnsupportedValue(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Nothing to write: row for {0} is empty")]
    EmptyRow(String),

    #[error("Refusing to modify every row of {0}: no filter given")]
    MissingWhere(String),
}
