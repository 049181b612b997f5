//! Page rendering behind a trait so a full template engine can be swapped in.

pub mod simple;

use serde_json::Value;
use thiserror::Error;

pub use simple::SimpleTemplateEngine;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),
}

pub trait TemplateEngine: Send + Sync {
    /// Render `template` (e.g. `tickets/show`) against a JSON context. The
    /// context carries the page data merged over the request globals
    /// (`app_name`, `current_user`, `csrf_token`, `flash`, `form_data`).
    fn render(&self, template: &str, context: &Value) -> Result<String, TemplateError>;
}
