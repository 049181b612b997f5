use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::server::AppState;
use crate::session::{CookieAction, Session};

/// Per-request session, shared between the middleware and the front controller.
pub type SharedSession = Arc<Mutex<Session>>;

/// Load the session named by the request cookie, run the request, then write
/// the session back and set or expire the cookie to match.
pub async fn session_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let cookie_id = state.cookie.read(request.headers());
    let session = match Session::load(state.sessions.as_ref(), cookie_id, state.config.session.timeout_secs).await {
        Ok(session) => session,
        Err(e) => return AppError::from(e).into_response(),
    };

    let shared: SharedSession = Arc::new(Mutex::new(session));
    request.extensions_mut().insert(shared.clone());

    let mut response = next.run(request).await;

    let mut session = shared.lock().await;
    let action = match session.persist(state.sessions.as_ref()).await {
        Ok(action) => action,
        Err(e) => return AppError::from(e).into_response(),
    };

    let cookie = match action {
        CookieAction::Keep => None,
        CookieAction::Set(id) => Some(state.cookie.set_value(&id)),
        CookieAction::Expire => Some(state.cookie.expire_value()),
    };
    if let Some(cookie) = cookie {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Session cookie is not a valid header value: {}", e),
        }
    }

    response
}
