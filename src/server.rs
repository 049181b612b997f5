//! HTTP surface: shared state, the axum router and the front controller.
//!
//! Every page request goes through one fallback handler that resolves the
//! route, applies the login and CSRF gates, dispatches to a controller and
//! renders the [`Outcome`]. Only `/health` bypasses it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use serde_json::{json, Value};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use url::Url;

use crate::auth::{AuthProvider, LocalAuth, RemoteAuth};
use crate::config::{AppConfig, BackendKind, SessionStoreKind};
use crate::data::Backend;
use crate::error::AppError;
use crate::handlers::{self, identity_json, is_local_path, Context, Outcome};
use crate::middleware::{session_middleware, SharedSession};
use crate::routing::{build_routes, Action, RouteTable};
use crate::security::{generate_csrf_token, verify_csrf_token, RateLimiter};
use crate::session::{CookieOptions, FileSessionStore, FormData, MemorySessionStore, Session, SessionStore};
use crate::templates::simple::template_not_found;
use crate::templates::{SimpleTemplateEngine, TemplateEngine};

/// Everything a request needs, built once at startup and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub backend: Backend,
    pub auth: Arc<dyn AuthProvider>,
    pub sessions: Arc<dyn SessionStore>,
    pub templates: Arc<dyn TemplateEngine>,
    pub routes: Arc<RouteTable<Action>>,
    pub cookie: CookieOptions,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        backend: Backend,
        auth: Arc<dyn AuthProvider>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let cookie = CookieOptions {
            name: config.session.cookie_name.clone(),
            secure: config.security.secure_cookies,
        };
        let rate_limiter = RateLimiter::new(
            config.security.login_attempts_limit,
            config.security.login_lockout_secs,
        );
        Self {
            config: Arc::new(config),
            backend,
            auth,
            sessions,
            templates: Arc::new(SimpleTemplateEngine::new()),
            routes: Arc::new(build_routes()),
            cookie,
            rate_limiter,
        }
    }

    /// Connect the configured backend and pick the matching identity provider
    /// and session store.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let backend = Backend::connect(&config.backend)
            .await
            .context("failed to initialise the data backend")?;

        let auth: Arc<dyn AuthProvider> = match backend.kind() {
            BackendKind::Rest => Arc::new(RemoteAuth::new(
                &config.backend.url,
                &config.backend.anon_key,
                Duration::from_secs(config.backend.timeout_secs),
            )?),
            BackendKind::Sql | BackendKind::Memory => {
                Arc::new(LocalAuth::new(backend.client(None, config.app.debug)))
            }
        };

        let idle_secs = config.session.timeout_secs;
        let sessions: Arc<dyn SessionStore> = match config.session.store {
            SessionStoreKind::Memory => Arc::new(MemorySessionStore::new(idle_secs)),
            SessionStoreKind::File => Arc::new(
                FileSessionStore::new(&config.session.dir, idle_secs)
                    .await
                    .with_context(|| format!("session directory {} is not usable", config.session.dir))?,
            ),
        };
        let purged = sessions.purge_expired().await.context("failed to sweep idle sessions")?;
        if purged > 0 {
            tracing::info!("Removed {} idle sessions left from a previous run", purged);
        }

        tracing::info!(
            "Using {:?} backend with {:?} session store",
            backend.kind(),
            config.session.store
        );
        Ok(Self::new(config, backend, auth, sessions))
    }
}

pub fn router(state: AppState) -> Router {
    let pages = Router::new()
        .fallback(front_controller)
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(pages)
        .layer(CatchPanicLayer::new())
        .layer(cors(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("{} listening on http://{}", state.config.app.name, bind_addr);
    spawn_session_sweeper(state.sessions.clone(), sweep_interval(state.config.session.timeout_secs));

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

/// Sweep at least every 15 minutes, and no more than once a minute.
fn sweep_interval(timeout_secs: i64) -> Duration {
    Duration::from_secs(timeout_secs.clamp(60, 900) as u64)
}

/// Idle sessions are dropped on load, but a session nobody returns to is only
/// removed by this sweep.
fn spawn_session_sweeper(sessions: Arc<dyn SessionStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sessions.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!("Swept {} idle sessions", purged),
                Err(e) => tracing::warn!("Session sweep failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

/// Pages are only ever requested by our own origin.
fn cors(config: &AppConfig) -> CorsLayer {
    match HeaderValue::from_str(&config.app.url) {
        Ok(origin) => CorsLayer::new().allow_origin(origin).allow_methods([Method::GET, Method::POST]),
        Err(_) => CorsLayer::new(),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.backend.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "backend": state.backend.kind(),
                    "version": state.config.app.version,
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "backend unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "backend": state.backend.kind(),
                    }
                })),
            )
        }
    }
}

async fn front_controller(
    State(state): State<AppState>,
    Extension(shared): Extension<SharedSession>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut session = shared.lock().await;
    let path = uri.path();

    let Some(matched) = state.routes.resolve(&method, path) else {
        tracing::debug!("No route for {} {}", method, path);
        return render_page(&state, &mut session, "errors/404", json!({ "title": "Page Not Found" }), StatusCode::NOT_FOUND);
    };
    let action = *matched.handler;
    let params = matched.params;

    if !action.is_public() && !session.is_logged_in() {
        if method == Method::GET || method == Method::HEAD {
            session.remember_redirect(path_and_query(&uri));
        }
        return redirect("/login");
    }

    let form: FormData = if method == Method::POST {
        url::form_urlencoded::parse(&body).into_owned().collect()
    } else {
        FormData::new()
    };

    if method == Method::POST {
        let token = form
            .get(&state.config.security.csrf_token_name)
            .map(String::as_str)
            .unwrap_or("");
        if !verify_csrf_token(&session, token) {
            tracing::warn!("Rejected {} {}: missing or invalid CSRF token", method, path);
            session.set_flash("error", "Invalid security token. Please try again.");
            return redirect(&back_path(&headers, &state.config.app.url));
        }
    }

    let query: HashMap<String, String> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut ctx = Context {
        state: &state,
        session: &mut session,
        params,
        query,
        form,
    };
    let outcome = handlers::dispatch(action, &mut ctx).await;

    match outcome {
        Ok(outcome) => respond(&state, &mut session, outcome),
        Err(e) => error_page(&state, &mut session, e),
    }
}

fn respond(state: &AppState, session: &mut Session, outcome: Outcome) -> Response {
    match outcome {
        Outcome::Render { template, data } => render_page(state, session, template, data, StatusCode::OK),
        Outcome::Redirect(to) => redirect(&to),
        Outcome::Json(value) => Json(value).into_response(),
        Outcome::NotFound => {
            render_page(state, session, "errors/404", json!({ "title": "Page Not Found" }), StatusCode::NOT_FOUND)
        }
    }
}

fn error_page(state: &AppState, session: &mut Session, error: AppError) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let template = if status == StatusCode::NOT_FOUND { "errors/404" } else { "errors/500" };
    // Details only leave the server in debug mode
    let message = if state.config.app.debug { Value::from(error.message()) } else { Value::Null };
    render_page(state, session, template, json!({ "title": "Error", "message": message }), status)
}

/// Page data merged over the globals every template can rely on. Reading the
/// globals consumes pending flashes and echoed form input.
fn render_page(state: &AppState, session: &mut Session, template: &str, data: Value, status: StatusCode) -> Response {
    let mut context = request_globals(state, session);
    if let (Value::Object(globals), Value::Object(page)) = (&mut context, data) {
        globals.extend(page);
    }

    match state.templates.render(template, &context) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(template_not_found(template))).into_response()
        }
    }
}

fn request_globals(state: &AppState, session: &mut Session) -> Value {
    let csrf_token = generate_csrf_token(session);
    let is_logged_in = session.is_logged_in();
    let current_user = session.identity().map(identity_json);

    json!({
        "app_name": state.config.app.name,
        "app_url": state.config.app.url,
        "app_version": state.config.app.version,
        "debug": state.config.app.debug,
        "is_logged_in": is_logged_in,
        "current_user": current_user,
        "csrf_token": csrf_token,
        "csrf_token_name": state.config.security.csrf_token_name,
        "flash": session.take_flashes(),
        "form_data": session.take_form_data(),
    })
}

fn redirect(to: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, to.to_string())]).into_response()
}

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Where to send a rejected form: the referring page when it is ours, else `/`.
fn back_path(headers: &HeaderMap, app_url: &str) -> String {
    let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) else {
        return "/".to_string();
    };

    let url = match Url::parse(referer) {
        Ok(url) => url,
        Err(_) if is_local_path(referer) => return referer.to_string(),
        Err(_) => return "/".to_string(),
    };

    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let authority = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => Some(format!("{}:{}", h, p)),
        (Some(h), None) => Some(h.to_string()),
        _ => None,
    };
    let same_host = authority.is_some() && authority.as_deref() == host;
    let same_app = Url::parse(app_url).map(|app| app.origin() == url.origin()).unwrap_or(false);

    if !(same_host || same_app) {
        return "/".to_string();
    }
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn back_path_keeps_same_origin_referers() {
        let same = headers(&[
            (header::REFERER, "http://localhost:8000/tickets/3/edit?x=1"),
            (header::HOST, "localhost:8000"),
        ]);
        assert_eq!(back_path(&same, "http://example.com"), "/tickets/3/edit?x=1");

        let by_app_url = headers(&[(header::REFERER, "https://tickets.example.com/profile")]);
        assert_eq!(back_path(&by_app_url, "https://tickets.example.com"), "/profile");
    }

    #[test]
    fn sweep_interval_is_clamped() {
        assert_eq!(sweep_interval(5), Duration::from_secs(60));
        assert_eq!(sweep_interval(300), Duration::from_secs(300));
        assert_eq!(sweep_interval(86_400), Duration::from_secs(900));
    }

    #[test]
    fn back_path_drops_foreign_or_missing_referers() {
        let foreign = headers(&[(header::REFERER, "https://evil.test/phish"), (header::HOST, "localhost:8000")]);
        assert_eq!(back_path(&foreign, "http://localhost:8000"), "/");
        assert_eq!(back_path(&HeaderMap::new(), "http://localhost:8000"), "/");

        let relative = headers(&[(header::REFERER, "//evil.test/x")]);
        assert_eq!(back_path(&relative, "http://localhost:8000"), "/");
    }
}
