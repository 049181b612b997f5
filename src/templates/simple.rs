use serde_json::Value;

use super::{TemplateEngine, TemplateError};
use crate::data::models::{Priority, Status};
use crate::security::escape_html_once as esc;

/// Built-in renderer producing plain server-side HTML for every page the
/// application serves.
#[derive(Debug, Default, Clone)]
pub struct SimpleTemplateEngine;

impl SimpleTemplateEngine {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateEngine for SimpleTemplateEngine {
    fn render(&self, template: &str, ctx: &Value) -> Result<String, TemplateError> {
        let body = match template.trim_end_matches(".twig") {
            "home/index" => home(ctx),
            "auth/login" => login(ctx),
            "auth/register" => register(ctx),
            "auth/profile" => profile(ctx),
            "dashboard/index" => dashboard(ctx),
            "tickets/index" => ticket_index(ctx),
            "tickets/create" => ticket_form(ctx, None),
            "tickets/edit" => ticket_form(ctx, ctx.get("ticket")),
            "tickets/show" => ticket_show(ctx),
            "errors/404" => error_page(ctx, "Page Not Found", "The page you requested does not exist."),
            "errors/500" => error_page(ctx, "Something went wrong", "An unexpected error occurred."),
            _ => return Err(TemplateError::NotFound(template.to_string())),
        };
        Ok(layout(ctx, &body))
    }
}

/// Fallback page when a template is missing.
pub fn template_not_found(template: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body><div class=\"container\"><div class=\"alert alert-warning\">\
         <h4>Template Not Found</h4><p>Template <code>{}</code> could not be found.</p></div></div></body></html>",
        esc(template)
    )
}

fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Displayable text of a scalar field, escaped.
fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => esc(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Echoed form input first, then the stored entity's value.
fn field_value(ctx: &Value, entity: Option<&Value>, field: &str) -> String {
    let echoed = ctx.get("form_data").map(|f| text(f, field)).unwrap_or_default();
    if !echoed.is_empty() {
        return echoed;
    }
    entity.map(|e| text(e, field)).unwrap_or_default()
}

fn field_error(ctx: &Value, field: &str) -> String {
    let message = ctx.get("flash").map(|f| text(f, &format!("error_{}", field))).unwrap_or_default();
    if message.is_empty() {
        String::new()
    } else {
        format!("<div class=\"invalid-feedback d-block\">{}</div>", message)
    }
}

fn csrf_field(ctx: &Value) -> String {
    format!(
        "<input type=\"hidden\" name=\"{}\" value=\"{}\">",
        text(ctx, "csrf_token_name"),
        text(ctx, "csrf_token")
    )
}

fn input(ctx: &Value, entity: Option<&Value>, field: &str, label: &str, kind: &str) -> String {
    let value = if kind == "password" { String::new() } else { field_value(ctx, entity, field) };
    format!(
        "<div class=\"mb-3\"><label for=\"{f}\">{label}</label>\
         <input type=\"{kind}\" id=\"{f}\" name=\"{f}\" value=\"{value}\" class=\"form-control\">{err}</div>",
        f = field,
        label = label,
        kind = kind,
        value = value,
        err = field_error(ctx, field)
    )
}

fn select(ctx: &Value, entity: Option<&Value>, field: &str, label: &str, options: &[(&str, &str)]) -> String {
    let current = field_value(ctx, entity, field);
    let mut html = format!(
        "<div class=\"mb-3\"><label for=\"{f}\">{label}</label><select id=\"{f}\" name=\"{f}\" class=\"form-select\">",
        f = field,
        label = label
    );
    html.push_str("<option value=\"\">Select...</option>");
    for (value, label) in options {
        let selected = if *value == current { " selected" } else { "" };
        html.push_str(&format!("<option value=\"{}\"{}>{}</option>", value, selected, label));
    }
    html.push_str("</select>");
    html.push_str(&field_error(ctx, field));
    html.push_str("</div>");
    html
}

fn status_options() -> Vec<(&'static str, &'static str)> {
    Status::ALL.iter().map(|s| (s.as_str(), s.label())).collect()
}

fn priority_options() -> Vec<(&'static str, &'static str)> {
    Priority::ALL.iter().map(|p| (p.as_str(), p.label())).collect()
}

fn status_label(value: &str) -> String {
    value.parse::<Status>().map(|s| s.label().to_string()).unwrap_or_else(|_| esc(value))
}

fn priority_label(value: &str) -> String {
    value.parse::<Priority>().map(|p| p.label().to_string()).unwrap_or_else(|_| esc(value))
}

fn layout(ctx: &Value, body: &str) -> String {
    let app_name = text(ctx, "app_name");
    let title = text(ctx, "title");
    let logged_in = ctx.get("is_logged_in").and_then(Value::as_bool).unwrap_or(false);

    let nav = if logged_in {
        let user = ctx.get("current_user").cloned().unwrap_or(Value::Null);
        format!(
            "<a href=\"/dashboard\">Dashboard</a> <a href=\"/tickets\">Tickets</a> \
             <a href=\"/tickets/create\">New Ticket</a> <a href=\"/profile\">{} {}</a> \
             <a href=\"/logout\">Logout</a>",
            text(&user, "first_name"),
            text(&user, "last_name")
        )
    } else {
        "<a href=\"/login\">Login</a> <a href=\"/register\">Register</a>".to_string()
    };

    let mut alerts = String::new();
    if let Some(Value::Object(flash)) = ctx.get("flash") {
        for kind in ["success", "error", "warning", "info"] {
            if let Some(Value::String(message)) = flash.get(kind) {
                let class = if kind == "error" { "danger" } else { kind };
                alerts.push_str(&format!("<div class=\"alert alert-{}\" role=\"alert\">{}</div>", class, esc(message)));
            }
        }
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title} - {app}</title></head><body>\
         <nav class=\"navbar\"><a class=\"navbar-brand\" href=\"/\">{app}</a> {nav}</nav>\
         <main class=\"container\">{alerts}{body}</main></body></html>",
        title = title,
        app = app_name,
        nav = nav,
        alerts = alerts,
        body = body
    )
}

fn home(ctx: &Value) -> String {
    format!(
        "<section class=\"hero\"><h1>{}</h1><p>Track support requests from report to resolution.</p>\
         <a class=\"btn btn-primary\" href=\"/register\">Get started</a> \
         <a class=\"btn btn-secondary\" href=\"/login\">Sign in</a></section>",
        text(ctx, "title")
    )
}

fn login(ctx: &Value) -> String {
    format!(
        "<h1>Login</h1><form method=\"post\" action=\"/login\">{}{}{}\
         <button type=\"submit\" class=\"btn btn-primary\">Login</button></form>\
         <p>No account yet? <a href=\"/register\">Register</a></p>",
        csrf_field(ctx),
        input(ctx, None, "username", "Username or Email", "text"),
        input(ctx, None, "password", "Password", "password")
    )
}

fn register(ctx: &Value) -> String {
    let mut html = String::from("<h1>Register</h1><form method=\"post\" action=\"/register\">");
    html.push_str(&csrf_field(ctx));
    html.push_str(&input(ctx, None, "first_name", "First Name", "text"));
    html.push_str(&input(ctx, None, "last_name", "Last Name", "text"));
    html.push_str(&input(ctx, None, "username", "Username", "text"));
    html.push_str(&input(ctx, None, "email", "Email", "email"));
    html.push_str(&input(ctx, None, "password", "Password", "password"));
    html.push_str(&input(ctx, None, "confirm_password", "Confirm Password", "password"));
    html.push_str("<button type=\"submit\" class=\"btn btn-primary\">Create account</button></form>");
    html.push_str("<p>Already registered? <a href=\"/login\">Login</a></p>");
    html
}

fn profile(ctx: &Value) -> String {
    let user = ctx.get("user");
    let mut html = String::from("<h1>My Profile</h1>");
    if let Some(user) = user {
        html.push_str(&format!(
            "<p>Signed in as <strong>{}</strong> ({})</p>",
            text(user, "email"),
            text(user, "role")
        ));
    }
    html.push_str("<form method=\"post\" action=\"/profile\">");
    html.push_str(&csrf_field(ctx));
    html.push_str(&input(ctx, user, "first_name", "First Name", "text"));
    html.push_str(&input(ctx, user, "last_name", "Last Name", "text"));
    html.push_str(&input(ctx, user, "email", "Email", "email"));
    html.push_str("<h2>Change Password</h2>");
    html.push_str(&input(ctx, None, "current_password", "Current Password", "password"));
    html.push_str(&input(ctx, None, "new_password", "New Password", "password"));
    html.push_str(&input(ctx, None, "confirm_password", "Confirm New Password", "password"));
    html.push_str("<button type=\"submit\" class=\"btn btn-primary\">Update Profile</button></form>");
    html
}

fn ticket_rows(tickets: &[Value]) -> String {
    if tickets.is_empty() {
        return "<p class=\"text-muted\">No tickets found.</p>".to_string();
    }
    let mut html = String::from(
        "<table class=\"table\"><thead><tr><th>#</th><th>Title</th><th>Status</th>\
         <th>Priority</th><th>Category</th><th>Created</th></tr></thead><tbody>",
    );
    for ticket in tickets {
        html.push_str(&format!(
            "<tr><td>{id}</td><td><a href=\"/tickets/{id}\">{title}</a></td><td>{status}</td>\
             <td>{priority}</td><td>{category}</td><td>{created}</td></tr>",
            id = text(ticket, "id"),
            title = text(ticket, "title"),
            status = status_label(str_of(ticket, "status")),
            priority = priority_label(str_of(ticket, "priority")),
            category = text(ticket, "category"),
            created = text(ticket, "created_at"),
        ));
    }
    html.push_str("</tbody></table>");
    html
}

fn dashboard(ctx: &Value) -> String {
    let stats = ctx.get("stats").cloned().unwrap_or(Value::Null);
    let mut html = String::from("<h1>Dashboard</h1><div class=\"row stats\">");
    for (key, label) in [
        ("total_tickets", "Total"),
        ("open_tickets", "Open"),
        ("in_progress_tickets", "In Progress"),
        ("resolved_tickets", "Resolved"),
        ("closed_tickets", "Closed"),
        ("high_priority_tickets", "High Priority"),
    ] {
        let value = text(&stats, key);
        html.push_str(&format!(
            "<div class=\"card stat\" data-stat=\"{}\"><span class=\"label\">{}</span> <span class=\"value\">{}</span></div>",
            key,
            label,
            if value.is_empty() { "0".to_string() } else { value }
        ));
    }
    html.push_str("</div>");

    if let Some(chart) = ctx.get("chart_data") {
        // Chart scripts read the distributions from this attribute
        html.push_str(&format!(
            "<div id=\"charts\" data-charts=\"{}\"></div>",
            esc(&chart.to_string())
        ));
    }

    html.push_str("<h2>Recent Tickets</h2>");
    html.push_str(&ticket_rows(array(ctx, "recent_tickets")));
    html
}

fn ticket_index(ctx: &Value) -> String {
    let filters = ctx.get("filters").cloned().unwrap_or(Value::Null);
    let mut html = String::from("<h1>Tickets</h1><a class=\"btn btn-primary\" href=\"/tickets/create\">New Ticket</a>");

    html.push_str("<form method=\"get\" action=\"/tickets\" class=\"filters\">");
    html.push_str(&select(&Value::Null, Some(&filters), "status", "Status", &status_options()));
    html.push_str(&select(&Value::Null, Some(&filters), "priority", "Priority", &priority_options()));
    html.push_str("<div class=\"mb-3\"><label for=\"category\">Category</label><select id=\"category\" name=\"category\" class=\"form-select\"><option value=\"\">All</option>");
    let current = text(&filters, "category");
    for category in array(ctx, "categories").iter().filter_map(Value::as_str) {
        let category = esc(category);
        let selected = if category == current { " selected" } else { "" };
        html.push_str(&format!("<option value=\"{c}\"{s}>{c}</option>", c = category, s = selected));
    }
    html.push_str("</select></div><button type=\"submit\" class=\"btn btn-secondary\">Filter</button></form>");

    html.push_str(&ticket_rows(array(ctx, "tickets")));

    if let Some(pagination) = ctx.get("pagination") {
        let total_pages = pagination.get("total_pages").and_then(Value::as_u64).unwrap_or(0);
        if total_pages > 1 {
            let query = pagination.get("query").and_then(Value::as_str).unwrap_or("");
            let link = |page: u64, label: &str| format!("<a href=\"/tickets?{}page={}\">{}</a>", esc(query), page, label);
            html.push_str("<nav class=\"pagination\">");
            if let Some(prev) = pagination.get("previous_page").and_then(Value::as_u64) {
                html.push_str(&link(prev, "&laquo; Previous"));
            }
            html.push_str(&format!(
                " <span>Page {} of {} ({} tickets)</span> ",
                text(pagination, "current_page"),
                total_pages,
                text(pagination, "total_items")
            ));
            if let Some(next) = pagination.get("next_page").and_then(Value::as_u64) {
                html.push_str(&link(next, "Next &raquo;"));
            }
            html.push_str("</nav>");
        }
    }
    html
}

fn ticket_form(ctx: &Value, ticket: Option<&Value>) -> String {
    let (heading, action, button) = match ticket {
        Some(t) => (
            format!("Edit Ticket #{}", text(t, "id")),
            format!("/tickets/{}/update", text(t, "id")),
            "Save Changes",
        ),
        None => ("Create New Ticket".to_string(), "/tickets".to_string(), "Create Ticket"),
    };
    let mut html = format!("<h1>{}</h1><form method=\"post\" action=\"{}\">", heading, action);
    html.push_str(&csrf_field(ctx));
    html.push_str(&input(ctx, ticket, "title", "Title", "text"));
    html.push_str(&format!(
        "<div class=\"mb-3\"><label for=\"description\">Description</label>\
         <textarea id=\"description\" name=\"description\" rows=\"6\" class=\"form-control\">{}</textarea>{}</div>",
        field_value(ctx, ticket, "description"),
        field_error(ctx, "description")
    ));
    html.push_str(&select(ctx, ticket, "priority", "Priority", &priority_options()));
    html.push_str(&input(ctx, ticket, "category", "Category", "text"));
    if ticket.is_some() {
        html.push_str(&select(ctx, ticket, "status", "Status", &status_options()));
    }
    html.push_str(&format!("<button type=\"submit\" class=\"btn btn-primary\">{}</button></form>", button));
    html
}

fn ticket_show(ctx: &Value) -> String {
    let ticket = ctx.get("ticket").cloned().unwrap_or(Value::Null);
    let id = text(&ticket, "id");
    let mut html = format!(
        "<h1>#{} {}</h1><dl class=\"ticket-meta\">\
         <dt>Status</dt><dd>{}</dd><dt>Priority</dt><dd>{}</dd><dt>Category</dt><dd>{}</dd>\
         <dt>Reported by</dt><dd>{}</dd><dt>Created</dt><dd>{}</dd>",
        id,
        text(&ticket, "title"),
        status_label(str_of(&ticket, "status")),
        priority_label(str_of(&ticket, "priority")),
        text(&ticket, "category"),
        text(&ticket, "user_email"),
        text(&ticket, "created_at"),
    );
    let resolved = text(&ticket, "resolved_at");
    if !resolved.is_empty() {
        html.push_str(&format!("<dt>Resolved</dt><dd>{}</dd>", resolved));
    }
    html.push_str("</dl>");
    html.push_str(&format!("<div class=\"description\">{}</div>", text(&ticket, "description")));

    if ctx.get("can_edit").and_then(Value::as_bool).unwrap_or(false) {
        html.push_str(&format!(
            "<a class=\"btn btn-secondary\" href=\"/tickets/{id}/edit\">Edit</a>\
             <form method=\"post\" action=\"/tickets/{id}/delete\" class=\"inline\">{csrf}\
             <button type=\"submit\" class=\"btn btn-danger\">Delete</button></form>",
            id = id,
            csrf = csrf_field(ctx)
        ));
    }

    html.push_str("<h2>Comments</h2>");
    let comments = array(ctx, "comments");
    if comments.is_empty() {
        html.push_str("<p class=\"text-muted\">No comments yet.</p>");
    }
    for comment in comments {
        let internal = if comment.get("is_internal").and_then(Value::as_bool).unwrap_or(false) {
            " <span class=\"badge\">internal</span>"
        } else {
            ""
        };
        html.push_str(&format!(
            "<div class=\"comment\"><div class=\"comment-meta\">{} &middot; {}{}</div><p>{}</p></div>",
            text(comment, "author_email"),
            text(comment, "created_at"),
            internal,
            text(comment, "comment")
        ));
    }

    html.push_str(&format!("<form method=\"post\" action=\"/tickets/{}/comments\">", id));
    html.push_str(&csrf_field(ctx));
    html.push_str(&format!(
        "<div class=\"mb-3\"><label for=\"comment\">Add a comment</label>\
         <textarea id=\"comment\" name=\"comment\" rows=\"3\" class=\"form-control\">{}</textarea>{}</div>",
        field_value(ctx, None, "comment"),
        field_error(ctx, "comment")
    ));
    if ctx.get("current_user").map(|u| str_of(u, "role") == "admin").unwrap_or(false) {
        html.push_str("<label><input type=\"checkbox\" name=\"is_internal\" value=\"1\"> Internal note</label>");
    }
    html.push_str("<button type=\"submit\" class=\"btn btn-primary\">Add Comment</button></form>");
    html
}

fn error_page(ctx: &Value, heading: &str, default_message: &str) -> String {
    let message = text(ctx, "message");
    format!(
        "<div class=\"error-page\"><h1>{}</h1><p>{}</p><a href=\"/\">Back to home</a></div>",
        heading,
        if message.is_empty() { default_message.to_string() } else { message }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn globals() -> Value {
        json!({
            "app_name": "Ticketa",
            "csrf_token": "abc123",
            "csrf_token_name": "_token",
            "is_logged_in": false,
            "flash": {},
            "form_data": {}
        })
    }

    fn with(mut base: Value, extra: Value) -> Value {
        if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
            base.extend(extra);
        }
        base
    }

    #[test]
    fn login_form_carries_csrf_token_and_echo() {
        let ctx = with(globals(), json!({"title": "Login", "form_data": {"username": "alice"}}));
        let html = SimpleTemplateEngine::new().render("auth/login", &ctx).unwrap();
        assert!(html.contains("<title>Login - Ticketa</title>"));
        assert!(html.contains("name=\"_token\" value=\"abc123\""));
        assert!(html.contains("value=\"alice\""));
    }

    #[test]
    fn flashes_and_field_errors_render() {
        let ctx = with(
            globals(),
            json!({"title": "Create", "flash": {"error": "Please correct the following errors:", "error_title": "Title is required"}}),
        );
        let html = SimpleTemplateEngine::new().render("tickets/create", &ctx).unwrap();
        assert!(html.contains("alert-danger"));
        assert!(html.contains("Title is required"));
    }

    #[test]
    fn stored_entities_are_not_double_escaped() {
        let ctx = with(
            globals(),
            json!({"title": "Ticket", "ticket": {"id": 3, "title": "Tom &amp; Jerry <script>", "status": "open", "priority": "low"}}),
        );
        let html = SimpleTemplateEngine::new().render("tickets/show", &ctx).unwrap();
        assert!(html.contains("Tom &amp; Jerry &lt;script&gt;"));
        assert!(!html.contains("&amp;amp;"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = SimpleTemplateEngine::new().render("nope/missing", &globals()).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
        assert!(template_not_found("nope/missing").contains("Template Not Found"));
    }
}
