//! Identity providers.
//!
//! Exactly one [`AuthProvider`] is active per deployment: [`RemoteAuth`] when the
//! hosted backend owns the accounts, [`LocalAuth`] when they live in our own
//! `users` table.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::DataError;
use crate::security::PasswordError;

pub use local::LocalAuth;
pub use remote::RemoteAuth;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// The authenticated user as stored in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    /// Bearer for data requests; empty for local accounts.
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone().unwrap_or_else(|| self.email.clone())
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone)]
pub enum SignUpOutcome {
    SignedIn(Identity),
    /// The provider wants the address confirmed before the first sign-in.
    ConfirmationRequired,
}

#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub new_password: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password.")]
    InvalidCredentials,

    #[error("This account has been disabled.")]
    AccountDisabled,

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Email address is already registered")]
    EmailTaken,

    #[error("{0}")]
    Rejected(String),

    #[error("Authentication service unavailable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("Unexpected authentication response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, request: &SignUp) -> Result<SignUpOutcome, AuthError>;

    /// `identifier` is a username or an email address.
    async fn sign_in(&self, identifier: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    /// Re-check the current password of a signed-in user.
    async fn verify_password(&self, identity: &Identity, password: &str) -> Result<bool, AuthError> {
        match self.sign_in(&identity.email, password).await {
            Ok(_) => Ok(true),
            Err(AuthError::InvalidCredentials) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Apply profile changes and return the refreshed identity.
    async fn update_account(&self, identity: &Identity, update: &AccountUpdate) -> Result<Identity, AuthError>;
}
