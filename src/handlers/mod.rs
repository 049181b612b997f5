//! Page controllers.
//!
//! The front controller resolves a route to an [`Action`] and calls
//! [`dispatch`] with a [`Context`] holding the request's session, path
//! parameters, query string and form body. Controllers answer with an
//! [`Outcome`]; turning that into an HTTP response is the server's job.

pub mod auth;
pub mod dashboard;
pub mod home;
pub mod tickets;

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::auth::Identity;
use crate::data::DataClient;
use crate::error::AppError;
use crate::routing::Action;
use crate::security::{sanitize_input, sanitize_str};
use crate::server::AppState;
use crate::session::{FormData, Session};

/// Fields passed through untouched: escaping would change what the user typed.
const RAW_FIELDS: &[&str] = &["password", "confirm_password", "current_password", "new_password", "_token"];

/// What a controller wants the client to see.
#[derive(Debug)]
pub enum Outcome {
    /// Render a template with page data; request globals are merged in by the server.
    Render { template: &'static str, data: Value },
    /// 302 to a local path.
    Redirect(String),
    Json(Value),
    NotFound,
}

impl Outcome {
    pub fn render(template: &'static str, data: Value) -> Self {
        Outcome::Render { template, data }
    }

    pub fn redirect(to: impl Into<String>) -> Self {
        Outcome::Redirect(to.into())
    }
}

pub type HandlerResult = Result<Outcome, AppError>;

/// Everything a controller may touch for one request.
pub struct Context<'a> {
    pub state: &'a AppState,
    pub session: &'a mut Session,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub form: FormData,
}

impl<'a> Context<'a> {
    /// Data access as the signed-in user.
    pub fn data(&self) -> DataClient {
        self.state.backend.client(self.session.access_token(), self.state.config.app.debug)
    }

    /// The signed-in identity. Protected actions only run with one present.
    pub fn identity(&self) -> Result<Identity, AppError> {
        self.session
            .identity()
            .cloned()
            .ok_or_else(|| AppError::forbidden("You must be logged in to access this page."))
    }

    pub fn id_param(&self) -> Option<i64> {
        self.params.get("id").and_then(|id| id.parse().ok())
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    /// Query parameter escaped the same way stored values are.
    pub fn sanitized_query(&self, key: &str) -> Option<String> {
        self.query_value(key).map(sanitize_str)
    }

    /// Trimmed, HTML-escaped copy of the form. Password fields are left as typed.
    pub fn sanitized_form(&self) -> FormData {
        let fields: serde_json::Map<String, Value> = self
            .form
            .iter()
            .filter(|(key, _)| !RAW_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect();

        let mut clean: FormData = match sanitize_input(Value::Object(fields)) {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(s) => Some((key, s)),
                    _ => None,
                })
                .collect(),
            _ => FormData::new(),
        };
        for key in RAW_FIELDS {
            if let Some(value) = self.form.get(*key) {
                clean.insert(key.to_string(), value.clone());
            }
        }
        clean
    }

    /// Flash the summary plus one message per field, and keep the input for the next render.
    pub fn reject_form(&mut self, errors: BTreeMap<String, String>, form: &FormData) {
        self.session.set_flash("error", "Please correct the following errors:");
        for (field, message) in errors {
            self.session.set_flash(format!("error_{}", field), message);
        }
        self.keep_form(form);
    }

    /// Echo the submission into the next render, minus anything secret.
    pub fn keep_form(&mut self, form: &FormData) {
        let echoed = form
            .iter()
            .filter(|(key, _)| !RAW_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.session.set_form_data(echoed);
    }
}

pub async fn dispatch(action: Action, ctx: &mut Context<'_>) -> HandlerResult {
    tracing::debug!("Dispatching {}", action.name());
    match action {
        Action::Home => home::index(ctx).await,
        Action::ShowLogin => auth::show_login(ctx).await,
        Action::Login => auth::login(ctx).await,
        Action::ShowRegister => auth::show_register(ctx).await,
        Action::Register => auth::register(ctx).await,
        Action::Logout => auth::logout(ctx).await,
        Action::ShowProfile => auth::show_profile(ctx).await,
        Action::UpdateProfile => auth::update_profile(ctx).await,
        Action::Dashboard => dashboard::index(ctx).await,
        Action::ChartData => dashboard::chart_data(ctx).await,
        Action::TicketIndex => tickets::index(ctx).await,
        Action::TicketCreate => tickets::create(ctx).await,
        Action::TicketStore => tickets::store(ctx).await,
        Action::TicketShow => tickets::show(ctx).await,
        Action::TicketEdit => tickets::edit(ctx).await,
        Action::TicketUpdate => tickets::update(ctx).await,
        Action::TicketDelete => tickets::delete(ctx).await,
        Action::TicketComment => tickets::add_comment(ctx).await,
    }
}

/// One "{Label} is required" message per missing or blank field.
pub fn validate_required(form: &FormData, fields: &[&str]) -> BTreeMap<String, String> {
    fields
        .iter()
        .filter(|field| form.get(**field).map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|field| (field.to_string(), format!("{} is required", field_label(field))))
        .collect()
}

/// `confirm_password` becomes "Confirm password".
pub fn field_label(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Public view of an identity; tokens never reach a template.
pub fn identity_json(identity: &Identity) -> Value {
    serde_json::json!({
        "id": identity.id,
        "email": identity.email,
        "username": identity.username,
        "first_name": identity.first_name,
        "last_name": identity.last_name,
        "display_name": identity.display_name(),
        "role": identity.role.as_str(),
    })
}

/// Redirect targets must stay on this site.
pub fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

pub(crate) fn form_value<'f>(form: &'f FormData, key: &str) -> &'f str {
    form.get(key).map(|v| v.trim()).unwrap_or("")
}
