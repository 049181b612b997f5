//! Server-side session state.
//!
//! A [`Session`] is loaded by the session middleware for every request, handed to
//! the front controller as an explicit context object, and written back through a
//! [`SessionStore`] once the response is ready.

pub mod cookie;
pub mod store;

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthProvider, Identity};
use crate::security::rate_limit::{rate_limit_key, RateLimitEntry};

pub use cookie::CookieOptions;
pub use store::{FileSessionStore, MemorySessionStore, SessionError, SessionStore};

/// One-shot echo of a rejected form submission.
pub type FormData = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    pub identity: Option<Identity>,
    pub login_time: Option<i64>,
    pub last_activity: Option<i64>,
    #[serde(default)]
    pub flash: BTreeMap<String, String>,
    #[serde(default)]
    pub form_data: FormData,
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitEntry>,
    pub redirect_after_login: Option<String>,
    /// Last time the session was written back, for idle expiry in the store.
    #[serde(default)]
    pub touched_at: Option<i64>,
}

/// What the response must do with the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieAction {
    Keep,
    Set(String),
    Expire,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    /// Id the session was loaded under; `None` for a session started by this request.
    original_id: Option<String>,
    data: SessionData,
    timeout_secs: i64,
    destroyed: bool,
}

impl Session {
    pub fn start(timeout_secs: i64) -> Self {
        Self {
            id: generate_session_id(),
            original_id: None,
            data: SessionData::default(),
            timeout_secs,
            destroyed: false,
        }
    }

    pub fn resume(id: String, data: SessionData, timeout_secs: i64) -> Self {
        Self {
            original_id: Some(id.clone()),
            id,
            data,
            timeout_secs,
            destroyed: false,
        }
    }

    /// Resume the session named by the cookie, or start a fresh one.
    pub async fn load(store: &dyn SessionStore, cookie_id: Option<String>, timeout_secs: i64) -> Result<Self, SessionError> {
        if let Some(id) = cookie_id {
            if let Some(data) = store.load(&id).await? {
                return Ok(Self::resume(id, data, timeout_secs));
            }
        }
        Ok(Self::start(timeout_secs))
    }

    /// Write the session back and report what the cookie should become.
    pub async fn persist(&mut self, store: &dyn SessionStore) -> Result<CookieAction, SessionError> {
        if self.destroyed {
            if let Some(original) = &self.original_id {
                store.delete(original).await?;
                return Ok(CookieAction::Expire);
            }
            return Ok(CookieAction::Keep);
        }

        self.data.touched_at = Some(Utc::now().timestamp());
        store.save(&self.id, &self.data).await?;
        match &self.original_id {
            Some(original) if *original == self.id => Ok(CookieAction::Keep),
            Some(original) => {
                store.delete(original).await?;
                Ok(CookieAction::Set(self.id.clone()))
            }
            None => Ok(CookieAction::Set(self.id.clone())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.data.identity.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.identity().map(|i| i.access_token.as_str()).filter(|t| !t.is_empty())
    }

    /// Store the authenticated identity under a fresh session id.
    pub fn login(&mut self, identity: Identity) {
        self.regenerate_id();
        self.destroyed = false;

        for identifier in std::iter::once(identity.email.as_str()).chain(identity.username.as_deref()) {
            self.data.rate_limits.remove(&rate_limit_key(identifier));
        }

        let now = Utc::now().timestamp();
        self.data.identity = Some(identity);
        self.data.login_time = Some(now);
        self.data.last_activity = Some(now);
    }

    pub fn is_logged_in(&mut self) -> bool {
        self.is_logged_in_at(Utc::now().timestamp())
    }

    /// Fails closed: an idle session past the timeout is wiped.
    pub fn is_logged_in_at(&mut self, now: i64) -> bool {
        if self.data.identity.is_none() {
            return false;
        }
        match self.data.last_activity {
            Some(last) if now - last <= self.timeout_secs => {
                self.data.last_activity = Some(now);
                true
            }
            _ => {
                tracing::debug!("Session expired after inactivity");
                self.destroy();
                false
            }
        }
    }

    /// Sign out remotely (best effort), then wipe all state and expire the cookie.
    pub async fn logout(&mut self, auth: &dyn AuthProvider) {
        if let Some(token) = self.access_token() {
            if let Err(e) = auth.sign_out(token).await {
                tracing::warn!("Remote sign-out failed: {}", e);
            }
        }
        self.destroy();
    }

    pub fn destroy(&mut self) {
        self.data = SessionData::default();
        self.destroyed = true;
    }

    pub fn update_identity(&mut self, identity: Identity) {
        self.ensure_active();
        self.data.identity = Some(identity);
    }

    pub fn set_flash(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.ensure_active();
        self.data.flash.insert(kind.into(), message.into());
    }

    pub fn get_flash(&mut self, kind: &str) -> Option<String> {
        self.data.flash.remove(kind)
    }

    pub fn take_flashes(&mut self) -> BTreeMap<String, String> {
        std::mem::take(&mut self.data.flash)
    }

    pub fn set_form_data(&mut self, data: FormData) {
        self.ensure_active();
        self.data.form_data = data;
    }

    pub fn take_form_data(&mut self) -> FormData {
        std::mem::take(&mut self.data.form_data)
    }

    pub fn remember_redirect(&mut self, path: impl Into<String>) {
        self.ensure_active();
        self.data.redirect_after_login = Some(path.into());
    }

    pub fn take_redirect(&mut self) -> Option<String> {
        self.data.redirect_after_login.take()
    }

    pub(crate) fn csrf_token(&self) -> Option<&str> {
        self.data.csrf_token.as_deref()
    }

    pub(crate) fn set_csrf_token(&mut self, token: String) {
        self.ensure_active();
        self.data.csrf_token = Some(token);
    }

    pub(crate) fn rate_limits(&self) -> &HashMap<String, RateLimitEntry> {
        &self.data.rate_limits
    }

    pub(crate) fn rate_limits_mut(&mut self) -> &mut HashMap<String, RateLimitEntry> {
        self.ensure_active();
        &mut self.data.rate_limits
    }

    #[cfg(test)]
    pub(crate) fn data_mut(&mut self) -> &mut SessionData {
        &mut self.data
    }

    /// Writing into a destroyed session starts a new one under a new id.
    fn ensure_active(&mut self) {
        if self.destroyed {
            self.regenerate_id();
            self.destroyed = false;
        }
    }

    fn regenerate_id(&mut self) {
        self.id = generate_session_id();
    }
}

pub fn generate_session_id() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn identity() -> Identity {
        Identity {
            id: "u-1".into(),
            email: "a@x.com".into(),
            username: Some("alice".into()),
            first_name: "Alice".into(),
            last_name: "Smith".into(),
            role: Role::User,
            access_token: "access".into(),
            refresh_token: "refresh".into(),
        }
    }

    #[test]
    fn login_rotates_id_and_clears_rate_limits() {
        let mut session = Session::resume("aa".into(), SessionData::default(), 3600);
        session.rate_limits_mut().insert(rate_limit_key("a@x.com"), RateLimitEntry::default());
        session.rate_limits_mut().insert(rate_limit_key("alice"), RateLimitEntry::default());
        session.rate_limits_mut().insert(rate_limit_key("other"), RateLimitEntry::default());

        session.login(identity());

        assert_ne!(session.id(), "aa");
        assert_eq!(session.id().len(), 64);
        assert!(session.is_logged_in());
        assert_eq!(session.rate_limits().len(), 1);
        assert!(session.rate_limits().contains_key(&rate_limit_key("other")));
    }

    #[test]
    fn idle_session_expires_and_is_cleared() {
        let mut session = Session::start(3600);
        session.login(identity());
        session.set_flash("info", "hello");
        let now = Utc::now().timestamp();
        session.data_mut().last_activity = Some(now - 3601);

        assert!(!session.is_logged_in_at(now));
        assert!(session.is_destroyed());
        assert!(session.identity().is_none());
        assert!(session.data().flash.is_empty());
        assert!(session.data().login_time.is_none());
    }

    #[test]
    fn activity_within_timeout_refreshes_timestamp() {
        let mut session = Session::start(3600);
        session.login(identity());
        let now = Utc::now().timestamp();
        session.data_mut().last_activity = Some(now - 3599);
        assert!(session.is_logged_in_at(now));
        assert_eq!(session.data().last_activity, Some(now));
    }

    #[test]
    fn anonymous_session_is_not_logged_in() {
        let mut session = Session::start(3600);
        assert!(!session.is_logged_in());
        assert!(!session.is_destroyed());
    }

    #[test]
    fn flash_and_form_data_are_read_once() {
        let mut session = Session::start(3600);
        session.set_flash("error", "Title is required");
        let mut form = FormData::new();
        form.insert("title".into(), "Broken".into());
        session.set_form_data(form);

        assert_eq!(session.get_flash("error").as_deref(), Some("Title is required"));
        assert!(session.get_flash("error").is_none());
        assert_eq!(session.take_form_data().get("title").map(String::as_str), Some("Broken"));
        assert!(session.take_form_data().is_empty());
    }

    #[tokio::test]
    async fn persist_reports_cookie_changes() {
        let store = MemorySessionStore::new(3600);

        let mut fresh = Session::start(3600);
        let action = fresh.persist(&store).await.unwrap();
        assert_eq!(action, CookieAction::Set(fresh.id().to_string()));

        let data = store.load(fresh.id()).await.unwrap().unwrap();
        let mut resumed = Session::resume(fresh.id().to_string(), data, 3600);
        assert_eq!(resumed.persist(&store).await.unwrap(), CookieAction::Keep);

        resumed.login(identity());
        let rotated = resumed.persist(&store).await.unwrap();
        assert_eq!(rotated, CookieAction::Set(resumed.id().to_string()));
        assert!(store.load(fresh.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn destroyed_session_expires_cookie_unless_rewritten() {
        let store = MemorySessionStore::new(3600);
        store.save("aa", &SessionData::default()).await.unwrap();

        let mut session = Session::resume("aa".into(), SessionData::default(), 3600);
        session.destroy();
        assert_eq!(session.persist(&store).await.unwrap(), CookieAction::Expire);
        assert!(store.load("aa").await.unwrap().is_none());

        let mut session = Session::resume("bb".into(), SessionData::default(), 3600);
        session.destroy();
        session.set_flash("success", "You have been logged out successfully.");
        assert_ne!(session.id(), "bb");
        assert!(matches!(session.persist(&store).await.unwrap(), CookieAction::Set(_)));
    }
}
