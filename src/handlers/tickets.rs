use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{json, Value};

use super::{form_value, validate_required, Context, HandlerResult, Outcome};
use crate::auth::Identity;
use crate::data::models::{now_timestamp, Comment, Priority, Status, Ticket, COMMENTS, TICKETS};
use crate::data::DataClient;
use crate::filter::{Filter, Row};

pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 100;

/// Page window for a listing, as handed to the template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u32,
    pub has_previous: bool,
    pub has_next: bool,
    pub previous_page: Option<u32>,
    pub next_page: Option<u32>,
    /// Filter parameters to carry into page links, `&`-terminated when non-empty.
    pub query: String,
}

impl Pagination {
    pub fn new(total_items: u64, current_page: u32, per_page: u32) -> Self {
        let per_page = per_page.max(1);
        let total_pages = total_items.div_ceil(per_page as u64);
        let has_previous = current_page > 1;
        let has_next = (current_page as u64) < total_pages;
        Self {
            current_page,
            total_pages,
            total_items,
            items_per_page: per_page,
            has_previous,
            has_next,
            previous_page: has_previous.then(|| current_page - 1),
            next_page: has_next.then(|| current_page + 1),
            query: String::new(),
        }
    }

    pub fn offset(&self) -> u32 {
        (self.current_page - 1).saturating_mul(self.items_per_page)
    }
}

/// Non-admins only ever see their own tickets.
pub(crate) fn scoped(filter: Filter, identity: &Identity) -> Filter {
    if identity.is_admin() {
        filter
    } else {
        filter.where_eq("user_email", identity.email.as_str())
    }
}

fn can_manage(identity: &Identity, ticket: &Ticket) -> bool {
    identity.is_admin() || ticket.is_owned_by(&identity.email)
}

pub async fn index(ctx: &mut Context<'_>) -> HandlerResult {
    let identity = ctx.identity()?;

    let status = ctx.sanitized_query("status").and_then(|s| s.parse::<Status>().ok());
    let priority = ctx.sanitized_query("priority").and_then(|p| p.parse::<Priority>().ok());
    // Stored categories are escaped, so the filter must be too; links carry the value as typed
    let category = ctx.sanitized_query("category");
    let category_link = ctx.query_value("category").map(str::to_string);
    let page = ctx
        .query_value("page")
        .and_then(|p| p.parse::<u32>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1);
    let per_page = ctx
        .query_value("per_page")
        .or_else(|| ctx.query_value("limit"))
        .and_then(|n| n.parse::<u32>().ok())
        .map(|n| n.clamp(1, MAX_PER_PAGE))
        .unwrap_or(DEFAULT_PER_PAGE);

    let scope = scoped(Filter::new(TICKETS), &identity);
    let mut filter = scope.clone();
    if let Some(status) = status {
        filter = filter.where_eq("status", status.as_str());
    }
    if let Some(priority) = priority {
        filter = filter.where_eq("priority", priority.as_str());
    }
    if let Some(category) = &category {
        filter = filter.where_eq("category", category.as_str());
    }

    let data = ctx.data();
    let total = data.count(&filter).await;
    let mut pagination = Pagination::new(total, page, per_page);
    pagination.query = link_query(status, priority, category_link.as_deref(), per_page);

    let tickets: Vec<Ticket> = data
        .fetch_all_as(&filter.order_desc("created_at").limit(per_page, Some(pagination.offset())))
        .await;
    let categories = distinct_categories(&data, scope).await;

    Ok(Outcome::render(
        "tickets/index",
        json!({
            "title": "Tickets",
            "tickets": tickets,
            "filters": {
                "status": status.map(|s| s.as_str()).unwrap_or(""),
                "priority": priority.map(|p| p.as_str()).unwrap_or(""),
                "category": category.unwrap_or_default(),
            },
            "categories": categories,
            "pagination": pagination,
        }),
    ))
}

fn link_query(status: Option<Status>, priority: Option<Priority>, category: Option<&str>, per_page: u32) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    if let Some(status) = status {
        query.append_pair("status", status.as_str());
    }
    if let Some(priority) = priority {
        query.append_pair("priority", priority.as_str());
    }
    if let Some(category) = category {
        query.append_pair("category", category);
    }
    if per_page != DEFAULT_PER_PAGE {
        query.append_pair("per_page", &per_page.to_string());
    }
    let mut query = query.finish();
    if !query.is_empty() {
        query.push('&');
    }
    query
}

/// Sorted, de-duplicated categories within the caller's scope.
async fn distinct_categories(data: &DataClient, scope: Filter) -> Vec<String> {
    let rows = data.fetch_all(&scope.select(vec!["category".to_string()])).await;
    rows.iter()
        .filter_map(|row| row.get("category").and_then(Value::as_str))
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub async fn create(_ctx: &mut Context<'_>) -> HandlerResult {
    Ok(Outcome::render("tickets/create", json!({ "title": "Create New Ticket" })))
}

pub async fn store(ctx: &mut Context<'_>) -> HandlerResult {
    let identity = ctx.identity()?;
    let form = ctx.sanitized_form();
    let mut errors = validate_required(&form, &["title", "description", "priority", "category"]);

    let priority = form_value(&form, "priority");
    if !priority.is_empty() && priority.parse::<Priority>().is_err() {
        errors.insert("priority".into(), "Invalid priority level".into());
    }

    if !errors.is_empty() {
        ctx.reject_form(errors, &form);
        return Ok(Outcome::redirect("/tickets/create"));
    }

    let now = now_timestamp();
    let mut row = Row::new();
    row.insert("title".into(), form_value(&form, "title").into());
    row.insert("description".into(), form_value(&form, "description").into());
    row.insert("priority".into(), priority.into());
    row.insert("category".into(), form_value(&form, "category").into());
    row.insert("status".into(), Status::Open.as_str().into());
    row.insert("user_email".into(), identity.email.clone().into());
    row.insert("created_at".into(), now.clone().into());
    row.insert("updated_at".into(), now.into());

    match ctx.data().insert(TICKETS, row).await {
        Ok(stored) => {
            tracing::info!("Ticket created");
            ctx.session.set_flash("success", "Ticket created successfully!");
            match stored.get("id").and_then(Value::as_i64) {
                Some(id) => Ok(Outcome::redirect(format!("/tickets/{}", id))),
                None => Ok(Outcome::redirect("/tickets")),
            }
        }
        Err(_) => {
            ctx.session.set_flash("error", "Failed to create ticket. Please try again.");
            ctx.keep_form(&form);
            Ok(Outcome::redirect("/tickets/create"))
        }
    }
}

/// The ticket named by the `{id}` parameter, if the caller may `verb` it.
/// Otherwise the redirect that explains why not.
async fn authorized_ticket(ctx: &mut Context<'_>, verb: &str) -> Result<(Identity, Ticket), Outcome> {
    let identity = match ctx.identity() {
        Ok(identity) => identity,
        Err(_) => return Err(Outcome::redirect("/login")),
    };
    let ticket = match ctx.id_param() {
        Some(id) => ctx.data().fetch_one_as::<Ticket>(&Filter::new(TICKETS).where_eq("id", id)).await,
        None => None,
    };
    let Some(ticket) = ticket else {
        ctx.session.set_flash("error", "Ticket not found.");
        return Err(Outcome::redirect("/tickets"));
    };
    if !can_manage(&identity, &ticket) {
        tracing::warn!("Denied {} on ticket {}", verb, ticket.id);
        ctx.session.set_flash("error", format!("You do not have permission to {} this ticket.", verb));
        return Err(Outcome::redirect("/tickets"));
    }
    Ok((identity, ticket))
}

pub async fn show(ctx: &mut Context<'_>) -> HandlerResult {
    let (identity, ticket) = match authorized_ticket(ctx, "view").await {
        Ok(found) => found,
        Err(outcome) => return Ok(outcome),
    };

    let comments: Vec<Comment> = ctx
        .data()
        .fetch_all_as::<Comment>(&Filter::new(COMMENTS).where_eq("ticket_id", ticket.id).order_asc("created_at"))
        .await
        .into_iter()
        .filter(|c| identity.is_admin() || !c.is_internal)
        .collect();

    Ok(Outcome::render(
        "tickets/show",
        json!({
            "title": format!("Ticket #{}", ticket.id),
            "ticket": ticket,
            "comments": comments,
            "can_edit": can_manage(&identity, &ticket),
        }),
    ))
}

pub async fn edit(ctx: &mut Context<'_>) -> HandlerResult {
    let (_, ticket) = match authorized_ticket(ctx, "edit").await {
        Ok(found) => found,
        Err(outcome) => return Ok(outcome),
    };
    Ok(Outcome::render(
        "tickets/edit",
        json!({ "title": format!("Edit Ticket #{}", ticket.id), "ticket": ticket }),
    ))
}

pub async fn update(ctx: &mut Context<'_>) -> HandlerResult {
    let (identity, ticket) = match authorized_ticket(ctx, "edit").await {
        Ok(found) => found,
        Err(outcome) => return Ok(outcome),
    };
    let edit_path = format!("/tickets/{}/edit", ticket.id);

    let form = ctx.sanitized_form();
    let mut errors = validate_required(&form, &["title", "description", "priority", "category", "status"]);

    let status = form_value(&form, "status").parse::<Status>();
    if !form_value(&form, "status").is_empty() && status.is_err() {
        errors.insert("status".into(), "Invalid status".into());
    }
    let priority = form_value(&form, "priority").parse::<Priority>();
    if !form_value(&form, "priority").is_empty() && priority.is_err() {
        errors.insert("priority".into(), "Invalid priority level".into());
    }

    let (Ok(status), Ok(priority), true) = (status, priority, errors.is_empty()) else {
        ctx.reject_form(errors, &form);
        return Ok(Outcome::redirect(edit_path));
    };

    let now = now_timestamp();
    let mut row = Row::new();
    row.insert("title".into(), form_value(&form, "title").into());
    row.insert("description".into(), form_value(&form, "description").into());
    row.insert("status".into(), status.as_str().into());
    row.insert("priority".into(), priority.as_str().into());
    row.insert("category".into(), form_value(&form, "category").into());
    row.insert("updated_at".into(), now.clone().into());
    if status.is_terminal() {
        if !ticket.status.is_terminal() || ticket.resolved_at.is_none() {
            row.insert("resolved_at".into(), now.clone().into());
        }
    } else if ticket.resolved_at.is_some() {
        row.insert("resolved_at".into(), Value::Null);
    }

    let data = ctx.data();
    let by_id = Filter::new(TICKETS).where_eq("id", ticket.id);
    if data.update(&by_id, row).await.is_err() {
        ctx.session.set_flash("error", "Failed to update ticket. Please try again.");
        ctx.keep_form(&form);
        return Ok(Outcome::redirect(edit_path));
    }

    if status != ticket.status {
        let mut comment = Row::new();
        comment.insert("ticket_id".into(), ticket.id.into());
        comment.insert("author_email".into(), identity.email.clone().into());
        comment.insert(
            "comment".into(),
            format!("Status changed from {} to {}", ticket.status, status).into(),
        );
        comment.insert("is_internal".into(), false.into());
        comment.insert("created_at".into(), now.into());
        if let Err(e) = data.insert(COMMENTS, comment).await {
            tracing::warn!("Status change note for ticket {} not recorded: {}", ticket.id, e);
        }
    }

    ctx.session.set_flash("success", "Ticket updated successfully!");
    Ok(Outcome::redirect(format!("/tickets/{}", ticket.id)))
}

pub async fn delete(ctx: &mut Context<'_>) -> HandlerResult {
    let (_, ticket) = match authorized_ticket(ctx, "delete").await {
        Ok(found) => found,
        Err(outcome) => return Ok(outcome),
    };

    let data = ctx.data();
    if let Err(e) = data.delete(&Filter::new(COMMENTS).where_eq("ticket_id", ticket.id)).await {
        tracing::warn!("Comments of ticket {} not removed: {}", ticket.id, e);
    }
    if data.delete(&Filter::new(TICKETS).where_eq("id", ticket.id)).await.is_err() {
        ctx.session.set_flash("error", "Failed to delete ticket. Please try again.");
        return Ok(Outcome::redirect(format!("/tickets/{}", ticket.id)));
    }

    tracing::info!("Ticket {} deleted", ticket.id);
    ctx.session.set_flash("success", "Ticket deleted successfully!");
    Ok(Outcome::redirect("/tickets"))
}

pub async fn add_comment(ctx: &mut Context<'_>) -> HandlerResult {
    let (identity, ticket) = match authorized_ticket(ctx, "comment on").await {
        Ok(found) => found,
        Err(outcome) => return Ok(outcome),
    };
    let ticket_path = format!("/tickets/{}", ticket.id);

    let form = ctx.sanitized_form();
    let errors = validate_required(&form, &["comment"]);
    if !errors.is_empty() {
        ctx.reject_form(errors, &form);
        return Ok(Outcome::redirect(ticket_path));
    }

    // Only staff can hide a note from the reporter
    let is_internal = identity.is_admin() && !form_value(&form, "is_internal").is_empty();

    let mut row = Row::new();
    row.insert("ticket_id".into(), ticket.id.into());
    row.insert("author_email".into(), identity.email.clone().into());
    row.insert("comment".into(), form_value(&form, "comment").into());
    row.insert("is_internal".into(), is_internal.into());
    row.insert("created_at".into(), now_timestamp().into());

    match ctx.data().insert(COMMENTS, row).await {
        Ok(_) => ctx.session.set_flash("success", "Comment added successfully!"),
        Err(_) => {
            ctx.session.set_flash("error", "Failed to add comment. Please try again.");
            ctx.keep_form(&form);
        }
    }
    Ok(Outcome::redirect(ticket_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_window() {
        let first = Pagination::new(57, 1, 15);
        assert_eq!(first.total_pages, 4);
        assert!(!first.has_previous);
        assert_eq!(first.next_page, Some(2));
        assert_eq!(first.offset(), 0);

        let last = Pagination::new(57, 4, 15);
        assert!(!last.has_next);
        assert_eq!(last.previous_page, Some(3));
        assert_eq!(last.offset(), 45);

        let empty = Pagination::new(0, 1, 15);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
    }

    #[test]
    fn page_links_keep_filters() {
        assert_eq!(link_query(None, None, None, DEFAULT_PER_PAGE), "");
        assert_eq!(
            link_query(Some(Status::InProgress), None, Some("Network & VPN"), 50),
            "status=in_progress&category=Network+%26+VPN&per_page=50&"
        );
    }
}
