//! Accounts kept in our own `users` table, with Argon2id password hashes.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{AccountUpdate, AuthError, AuthProvider, Identity, Role, SignUp, SignUpOutcome};
use crate::data::models::{now_timestamp, User, USERS};
use crate::data::DataClient;
use crate::filter::{Filter, Row};
use crate::security::{hash_password, verify_password};

pub struct LocalAuth {
    data: DataClient,
}

impl LocalAuth {
    pub fn new(data: DataClient) -> Self {
        Self { data }
    }

    async fn find_by(&self, column: &str, value: &str) -> Option<User> {
        self.data.fetch_one_as(&Filter::new(USERS).where_eq(column, value)).await
    }

    async fn find_user(&self, identifier: &str) -> Option<User> {
        match self.find_by("username", identifier).await {
            Some(user) => Some(user),
            None => self.find_by("email", identifier).await,
        }
    }

    fn identity(user: &User) -> Identity {
        Identity {
            id: user.id.to_string(),
            email: user.email.clone(),
            username: Some(user.username.clone()),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
            access_token: String::new(),
            refresh_token: String::new(),
        }
    }

    fn by_id(identity: &Identity) -> Result<Filter, AuthError> {
        let id: i64 = identity
            .id
            .parse()
            .map_err(|_| AuthError::Decode(format!("local account id {} is not numeric", identity.id)))?;
        Ok(Filter::new(USERS).where_eq("id", id))
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn sign_up(&self, request: &SignUp) -> Result<SignUpOutcome, AuthError> {
        if self.find_by("username", &request.username).await.is_some() {
            return Err(AuthError::UsernameTaken);
        }
        if self.find_by("email", &request.email).await.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let stored = self
            .data
            .insert(
                USERS,
                row(json!({
                    "username": request.username,
                    "email": request.email,
                    "password_hash": hash_password(&request.password)?,
                    "first_name": request.first_name,
                    "last_name": request.last_name,
                    "role": Role::User.as_str(),
                    "is_active": true,
                })),
            )
            .await?;
        let user: User = serde_json::from_value(Value::Object(stored)).map_err(|e| AuthError::Decode(e.to_string()))?;
        tracing::info!("Registered local account {}", user.id);
        Ok(SignUpOutcome::SignedIn(Self::identity(&user)))
    }

    async fn sign_in(&self, identifier: &str, password: &str) -> Result<Identity, AuthError> {
        let Some(user) = self.find_user(identifier).await else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let touch = Filter::new(USERS).where_eq("id", user.id);
        if let Err(e) = self.data.update(&touch, row(json!({ "last_login": now_timestamp() }))).await {
            tracing::warn!("Could not record last login for user {}: {}", user.id, e);
        }
        Ok(Self::identity(&user))
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn verify_password(&self, identity: &Identity, password: &str) -> Result<bool, AuthError> {
        let user: Option<User> = self.data.fetch_one_as(&Self::by_id(identity)?).await;
        Ok(user.is_some_and(|user| verify_password(password, &user.password_hash)))
    }

    async fn update_account(&self, identity: &Identity, update: &AccountUpdate) -> Result<Identity, AuthError> {
        if let Some(other) = self.find_by("email", &update.email).await {
            if other.id.to_string() != identity.id {
                return Err(AuthError::EmailTaken);
            }
        }

        let mut changes = row(json!({
            "first_name": update.first_name,
            "last_name": update.last_name,
            "email": update.email,
        }));
        if let Some(password) = &update.new_password {
            changes.insert("password_hash".into(), Value::String(hash_password(password)?));
        }

        let updated = self.data.update(&Self::by_id(identity)?, changes).await?;
        let user: User = match updated.into_iter().next() {
            Some(stored) => serde_json::from_value(Value::Object(stored)).map_err(|e| AuthError::Decode(e.to_string()))?,
            None => return Err(AuthError::Decode("account vanished during update".into())),
        };
        Ok(Self::identity(&user))
    }
}
