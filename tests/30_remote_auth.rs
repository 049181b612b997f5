mod common;

use std::time::Duration;

use anyhow::Result;

use common::{spawn_mock_backend, MOCK_PASSWORD};
use ticketa::auth::{AuthError, AuthProvider, RemoteAuth};

fn provider(base_url: &str) -> Result<RemoteAuth> {
    Ok(RemoteAuth::new(base_url, "anon-key", Duration::from_secs(5))?)
}

#[tokio::test]
async fn password_grant_builds_identity() -> Result<()> {
    let mock = spawn_mock_backend().await?;
    let auth = provider(&mock.base_url)?;

    let identity = auth.sign_in("ann@example.com", MOCK_PASSWORD).await?;
    assert_eq!(identity.email, "ann@example.com");
    assert_eq!(identity.first_name, "Ann");
    assert_eq!(identity.username.as_deref(), Some("ann"));
    assert_eq!(identity.access_token, "access-abc");
    assert_eq!(identity.refresh_token, "refresh-abc");
    assert!(identity.is_admin());

    let request = mock.log.last().expect("request recorded");
    assert_eq!(request.path, "/auth/v1/token");
    assert_eq!(request.query, "grant_type=password");
    assert_eq!(request.header("apikey"), Some("anon-key"));
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() -> Result<()> {
    let mock = spawn_mock_backend().await?;
    let auth = provider(&mock.base_url)?;

    let result = auth.sign_in("ann@example.com", "nope").await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    Ok(())
}

#[tokio::test]
async fn usernames_are_refused_without_a_round_trip() -> Result<()> {
    let mock = spawn_mock_backend().await?;
    let auth = provider(&mock.base_url)?;

    let result = auth.sign_in("ann", MOCK_PASSWORD).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert!(mock.log.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn sign_out_presents_the_access_token() -> Result<()> {
    let mock = spawn_mock_backend().await?;
    let auth = provider(&mock.base_url)?;

    auth.sign_out("access-abc").await?;
    let request = mock.log.last().expect("request recorded");
    assert_eq!(request.path, "/auth/v1/logout");
    assert_eq!(request.header("authorization"), Some("Bearer access-abc"));
    Ok(())
}

#[tokio::test]
async fn verify_password_reuses_sign_in() -> Result<()> {
    let mock = spawn_mock_backend().await?;
    let auth = provider(&mock.base_url)?;
    let identity = auth.sign_in("ann@example.com", MOCK_PASSWORD).await?;

    assert!(auth.verify_password(&identity, MOCK_PASSWORD).await?);
    assert!(!auth.verify_password(&identity, "wrong").await?);
    Ok(())
}
