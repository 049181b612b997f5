use serde_json::json;

use super::{Context, HandlerResult, Outcome};

/// Landing page; signed-in users go straight to their dashboard.
pub async fn index(ctx: &mut Context<'_>) -> HandlerResult {
    if ctx.session.is_logged_in() {
        return Ok(Outcome::redirect("/dashboard"));
    }
    Ok(Outcome::render(
        "home/index",
        json!({ "title": format!("Welcome to {}", ctx.state.config.app.name) }),
    ))
}
