use serde::{Deserialize, Serialize};

use crate::auth::Role;

/// Account row of the local identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub last_login: Option<String>,
    pub created_at: Option<String>,
}

fn default_active() -> bool {
    true
}
