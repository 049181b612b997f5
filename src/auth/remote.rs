//! Client for a GoTrue-style auth API (`{url}/auth/v1/...`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AccountUpdate, AuthError, AuthProvider, Identity, Role, SignUp, SignUpOutcome};

pub struct RemoteAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    user_metadata: Value,
    #[serde(default)]
    app_metadata: Value,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<RemoteUser>,
}

impl RemoteUser {
    fn into_identity(self, access_token: String, refresh_token: String) -> Identity {
        let meta = |key: &str| self.user_metadata.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        // Only app metadata is trusted for roles; user metadata is user-editable
        let role = match self.app_metadata.get("role").and_then(Value::as_str) {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };
        let username = Some(meta("username")).filter(|u| !u.is_empty());
        Identity {
            first_name: meta("first_name"),
            last_name: meta("last_name"),
            username,
            id: self.id,
            email: self.email,
            role,
            access_token,
            refresh_token,
        }
    }
}

impl RemoteAuth {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/auth/v1/{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, AuthError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| AuthError::Decode(e.to_string()))
    }
}

/// Map an error reply onto [`AuthError`], keeping the provider's message when it is user-facing.
fn rejection(status: u16, body: &str) -> AuthError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| parsed.get(*key).and_then(Value::as_str))
        .unwrap_or("")
        .to_string();
    let lowered = message.to_lowercase();

    if lowered.contains("already registered") || lowered.contains("already been registered") {
        return AuthError::EmailTaken;
    }
    if lowered.contains("invalid login credentials") || lowered.contains("invalid_grant") || status == 401 {
        return AuthError::InvalidCredentials;
    }
    if (400..500).contains(&status) && !message.is_empty() {
        return AuthError::Rejected(message);
    }
    AuthError::Decode(format!("status {}: {}", status, body))
}

#[async_trait]
impl AuthProvider for RemoteAuth {
    async fn sign_up(&self, request: &SignUp) -> Result<SignUpOutcome, AuthError> {
        let body = json!({
            "email": request.email,
            "password": request.password,
            "data": {
                "username": request.username,
                "first_name": request.first_name,
                "last_name": request.last_name,
            }
        });
        let response = self.request(Method::POST, "signup", &self.anon_key).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &text));
        }

        // With confirmations enabled the reply is a bare user object without tokens
        let value: Value = serde_json::from_str(&text).map_err(|e| AuthError::Decode(e.to_string()))?;
        let tokens: TokenResponse = serde_json::from_value(value).map_err(|e| AuthError::Decode(e.to_string()))?;
        match (tokens.access_token, tokens.user) {
            (Some(access), Some(user)) => {
                tracing::info!("Registered remote account {}", user.id);
                Ok(SignUpOutcome::SignedIn(user.into_identity(access, tokens.refresh_token.unwrap_or_default())))
            }
            _ => Ok(SignUpOutcome::ConfirmationRequired),
        }
    }

    async fn sign_in(&self, identifier: &str, password: &str) -> Result<Identity, AuthError> {
        if !identifier.contains('@') {
            // The hosted provider only knows email addresses
            return Err(AuthError::InvalidCredentials);
        }
        let response = self
            .request(Method::POST, "token?grant_type=password", &self.anon_key)
            .json(&json!({ "email": identifier, "password": password }))
            .send()
            .await?;
        let tokens: TokenResponse = Self::read_json(response).await?;
        match (tokens.access_token, tokens.user) {
            (Some(access), Some(user)) => Ok(user.into_identity(access, tokens.refresh_token.unwrap_or_default())),
            _ => Err(AuthError::Decode("token response without session".into())),
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self.request(Method::POST, "logout", access_token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(rejection(status.as_u16(), &body))
    }

    async fn update_account(&self, identity: &Identity, update: &AccountUpdate) -> Result<Identity, AuthError> {
        let mut body = json!({
            "data": {
                "first_name": update.first_name,
                "last_name": update.last_name,
            }
        });
        if !update.email.eq_ignore_ascii_case(&identity.email) {
            body["email"] = json!(update.email);
        }
        if let Some(password) = &update.new_password {
            body["password"] = json!(password);
        }
        let response = self
            .request(Method::PUT, "user", &identity.access_token)
            .json(&body)
            .send()
            .await?;
        let user: RemoteUser = Self::read_json(response).await?;
        let mut refreshed = user.into_identity(identity.access_token.clone(), identity.refresh_token.clone());
        // An email change may wait for confirmation; the reply then still shows the old address
        if refreshed.username.is_none() {
            refreshed.username = identity.username.clone();
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_mapping() {
        assert!(matches!(
            rejection(422, r#"{"msg":"User already registered"}"#),
            AuthError::EmailTaken
        ));
        assert!(matches!(
            rejection(400, r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            AuthError::InvalidCredentials
        ));
        match rejection(422, r#"{"msg":"Password should be at least 6 characters"}"#) {
            AuthError::Rejected(msg) => assert!(msg.contains("at least 6")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(rejection(500, "oops"), AuthError::Decode(_)));
    }

    #[test]
    fn identity_from_remote_user() {
        let user: RemoteUser = serde_json::from_value(json!({
            "id": "0f8e",
            "email": "a@x.com",
            "user_metadata": {"first_name": "Alice", "last_name": "Smith", "username": "alice", "role": "admin"},
            "app_metadata": {"provider": "email"}
        }))
        .unwrap();
        let identity = user.into_identity("at".into(), "rt".into());
        assert_eq!(identity.first_name, "Alice");
        assert_eq!(identity.username.as_deref(), Some("alice"));
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.access_token, "at");
    }
}
