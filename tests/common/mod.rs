#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use ticketa::auth::LocalAuth;
use ticketa::config::AppConfig;
use ticketa::data::models::USERS;
use ticketa::data::{Backend, DataStore, MemoryStore};
use ticketa::security::hash_password;
use ticketa::server::{router, AppState};
use ticketa::session::MemorySessionStore;

/// Rows the mock `tickets` table reports.
pub const MOCK_TICKET_TOTAL: u64 = 57;
pub const MOCK_PASSWORD: &str = "Secret123";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<RecordedRequest>>>);

impl RequestLog {
    fn push(&self, request: RecordedRequest) {
        self.0.lock().unwrap().push(request);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<RecordedRequest> {
        self.0.lock().unwrap().last().cloned()
    }
}

/// PostgREST / GoTrue stand-in served on a free local port.
pub struct MockBackend {
    pub base_url: String,
    pub log: RequestLog,
}

pub async fn spawn_mock_backend() -> Result<MockBackend> {
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let log = RequestLog::default();

    let app = Router::new()
        .route("/rest/v1/", get(|| async { Json(json!({})) }))
        .route(
            "/rest/v1/:table",
            get(rest_select).post(rest_insert).patch(rest_update).delete(rest_delete),
        )
        .route("/auth/v1/token", post(auth_token))
        .route("/auth/v1/logout", post(|| async { StatusCode::NO_CONTENT }))
        .layer(middleware::from_fn_with_state(log.clone(), record))
        .with_state(log.clone());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .context("failed to bind mock backend")?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(MockBackend { base_url: format!("http://127.0.0.1:{}", port), log })
}

async fn record(State(log): State<RequestLog>, request: Request, next: Next) -> Response {
    log.push(RecordedRequest {
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        query: request.uri().query().unwrap_or("").to_string(),
        headers: request.headers().clone(),
    });
    next.run(request).await
}

fn requested_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get("Range")?.to_str().ok()?;
    let (start, end) = value.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn rest_select(Path(table): Path<String>, headers: HeaderMap) -> Response {
    let two_rows = json!([{ "id": 1 }, { "id": 2 }]);
    match table.as_str() {
        // A real table: ids 1..=57, newest first, windowed by the Range header
        "tickets" => {
            let (start, end) = requested_range(&headers).unwrap_or((0, MOCK_TICKET_TOTAL - 1));
            let end = end.min(MOCK_TICKET_TOTAL - 1);
            let rows: Vec<Value> = (start..=end)
                .map(|i| json!({ "id": MOCK_TICKET_TOTAL - i, "title": format!("Ticket {}", MOCK_TICKET_TOTAL - i) }))
                .collect();
            let wants_count = headers
                .get("Prefer")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("count=exact"))
                .unwrap_or(false);
            let total = if wants_count { MOCK_TICKET_TOTAL.to_string() } else { "*".to_string() };
            (
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_RANGE, format!("{}-{}/{}", start, end, total))],
                Json(Value::Array(rows)),
            )
                .into_response()
        }
        // Ignores the count preference entirely
        "legacy" => Json(two_rows).into_response(),
        "garbled" => ([(header::CONTENT_RANGE, "items=lots")], Json(two_rows)).into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "message": "relation does not exist" }))).into_response(),
    }
}

async fn rest_insert(Path(_table): Path<String>, Json(mut row): Json<Value>) -> Response {
    row["id"] = json!(MOCK_TICKET_TOTAL + 1);
    (StatusCode::CREATED, Json(json!([row]))).into_response()
}

async fn rest_update(Path(_table): Path<String>, Json(row): Json<Value>) -> Response {
    Json(json!([row])).into_response()
}

async fn rest_delete(Path(table): Path<String>) -> Response {
    match table.as_str() {
        "gone" => (StatusCode::NOT_FOUND, Json(json!({ "message": "not found" }))).into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn auth_token(Json(body): Json<Value>) -> Response {
    if body["password"] != MOCK_PASSWORD {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
        )
            .into_response();
    }
    Json(json!({
        "access_token": "access-abc",
        "refresh_token": "refresh-abc",
        "user": {
            "id": "8d0fd2b3-0000-4000-8000-000000000001",
            "email": body["email"],
            "user_metadata": { "first_name": "Ann", "last_name": "Lee", "username": "ann" },
            "app_metadata": { "provider": "email", "role": "admin" }
        }
    }))
    .into_response()
}

pub fn memory_config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "TICKETA_BACKEND" => Some("memory".to_string()),
        "APP_URL" => Some("http://localhost:8000".to_string()),
        _ => None,
    })
}

/// The full application over the in-memory backend.
pub fn memory_app() -> Router {
    memory_app_with_store().0
}

/// Like [`memory_app`], also handing back the store for seeding.
pub fn memory_app_with_store() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let backend = Backend::Memory(store.clone());
    let auth = Arc::new(LocalAuth::new(backend.client(None, true)));
    let app = router(AppState::new(memory_config(), backend, auth, Arc::new(MemorySessionStore::new(3600))));
    (app, store)
}

/// Insert an administrator who can sign in with [`MOCK_PASSWORD`].
pub async fn seed_admin(store: &MemoryStore, username: &str, email: &str) -> Result<()> {
    let row = json!({
        "username": username,
        "email": email,
        "password_hash": hash_password(MOCK_PASSWORD)?,
        "first_name": "Ada",
        "last_name": "Admin",
        "role": "admin",
        "is_active": true,
    });
    let Value::Object(row) = row else { unreachable!() };
    store.insert(USERS, row).await?;
    Ok(())
}

#[derive(Debug)]
pub struct Page {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: String,
}

impl Page {
    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.body).context("response is not JSON")
    }
}

/// Drives the router like a browser: keeps the session cookie and the last CSRF token seen.
pub struct Browser {
    app: Router,
    cookie: Option<String>,
    token: Option<String>,
}

impl Browser {
    pub fn new(app: Router) -> Self {
        Self { app, cookie: None, token: None }
    }

    /// The router under test, for a second visitor.
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub async fn get(&mut self, path: &str) -> Result<Page> {
        let request = self.request(Method::GET, path).body(Body::empty())?;
        self.send(request).await
    }

    /// POST a form, adding the current CSRF token.
    pub async fn post(&mut self, path: &str, fields: &[(&str, &str)]) -> Result<Page> {
        let token = self.token.clone().unwrap_or_default();
        let mut fields: Vec<(&str, &str)> = fields.to_vec();
        fields.push(("_token", token.as_str()));
        self.post_raw(path, &fields, None).await
    }

    pub async fn post_raw(&mut self, path: &str, fields: &[(&str, &str)], referer: Option<&str>) -> Result<Page> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        let mut builder = self
            .request(Method::POST, path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(referer) = referer {
            builder = builder.header(header::REFERER, referer);
        }
        let request = builder.body(Body::from(body))?;
        self.send(request).await
    }

    /// Sign up through the registration form and land on the dashboard.
    pub async fn register(&mut self, username: &str, email: &str, first_name: &str) -> Result<Page> {
        self.get("/register").await?;
        self.post(
            "/register",
            &[
                ("username", username),
                ("email", email),
                ("password", MOCK_PASSWORD),
                ("confirm_password", MOCK_PASSWORD),
                ("first_name", first_name),
                ("last_name", "Tester"),
            ],
        )
        .await
    }

    fn request(&self, method: Method, path: &str) -> axum::http::request::Builder {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, "localhost:8000");
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, format!("ticketa_session={}", cookie));
        }
        builder
    }

    async fn send(&mut self, request: Request) -> Result<Page> {
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();

        for value in response.headers().get_all(header::SET_COOKIE) {
            let value = value.to_str()?;
            if value.contains("Max-Age=0") {
                self.cookie = None;
            } else if let Some((_, id)) = value.split(';').next().and_then(|pair| pair.split_once('=')) {
                self.cookie = Some(id.to_string());
            }
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(token) = extract_token(&body) {
            self.token = Some(token);
        }
        Ok(Page { status, location, body })
    }
}

fn extract_token(html: &str) -> Option<String> {
    let marker = "name=\"_token\" value=\"";
    let start = html.find(marker)? + marker.len();
    let end = html[start..].find('"')?;
    Some(html[start..start + end].to_string())
}
