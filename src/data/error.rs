use thiserror::Error;

use crate::filter::FilterError;

#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("Unexpected backend response: {0}")]
    Decode(String),

    #[error("Invalid backend configuration: {0}")]
    Config(String),
}

impl DataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::Status { status: 404, .. })
    }
}
