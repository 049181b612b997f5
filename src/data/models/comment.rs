use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub ticket_id: i64,
    pub author_email: String,
    pub comment: String,
    #[serde(default)]
    pub is_internal: bool,
    pub created_at: Option<String>,
}
