use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use super::tickets::scoped;
use super::{Context, HandlerResult, Outcome};
use crate::data::models::{Priority, Status, Ticket, TICKETS};
use crate::data::DataClient;
use crate::filter::{Filter, Row};

const RECENT_TICKETS: u32 = 10;
const TOP_CATEGORIES: usize = 10;
const TIMELINE_DAYS: i64 = 30;

pub async fn index(ctx: &mut Context<'_>) -> HandlerResult {
    let identity = ctx.identity()?;
    let data = ctx.data();
    let scope = scoped(Filter::new(TICKETS), &identity);

    let total = data.count(&scope).await;
    let by_status = status_counts(&data, &scope).await;
    let by_priority = priority_counts(&data, &scope).await;
    let my_created = data
        .count(&Filter::new(TICKETS).where_eq("user_email", identity.email.as_str()))
        .await;

    let status_total = |status: Status| by_status.iter().find(|(s, _)| *s == status).map(|(_, n)| *n).unwrap_or(0);
    let high_priority: u64 = by_priority
        .iter()
        .filter(|(p, _)| matches!(p, Priority::High | Priority::Urgent))
        .map(|(_, n)| n)
        .sum();

    let stats = json!({
        "total_tickets": total,
        "open_tickets": status_total(Status::Open),
        "in_progress_tickets": status_total(Status::InProgress),
        "resolved_tickets": status_total(Status::Resolved),
        "closed_tickets": status_total(Status::Closed),
        "high_priority_tickets": high_priority,
        "my_created_tickets": my_created,
    });

    let recent: Vec<Ticket> = data
        .fetch_all_as(&scope.clone().order_desc("created_at").limit(RECENT_TICKETS, None))
        .await;

    let rows = chart_rows(&data, &scope).await;
    let mut chart_data = json!({
        "status_distribution": distribution(by_status.iter().map(|(s, n)| (s.label(), *n))),
        "priority_distribution": distribution(by_priority.iter().map(|(p, n)| (p.label(), *n))),
        "category_distribution": category_distribution(&rows),
        "tickets_over_time": tickets_over_time(&rows, Utc::now()),
    });
    if identity.is_admin() {
        chart_data["resolution_time"] = resolution_time(&rows);
    }

    Ok(Outcome::render(
        "dashboard/index",
        json!({
            "title": "Dashboard",
            "stats": stats,
            "recent_tickets": recent,
            "chart_data": chart_data,
        }),
    ))
}

/// `GET /dashboard/chart-data?type=…`; an unknown type yields `{}`.
pub async fn chart_data(ctx: &mut Context<'_>) -> HandlerResult {
    let identity = ctx.identity()?;
    let data = ctx.data();
    let scope = scoped(Filter::new(TICKETS), &identity);

    let chart = match ctx.query_value("type").unwrap_or("status") {
        "status" => {
            let counts = status_counts(&data, &scope).await;
            distribution(counts.iter().map(|(s, n)| (s.label(), *n)))
        }
        "priority" => {
            let counts = priority_counts(&data, &scope).await;
            distribution(counts.iter().map(|(p, n)| (p.label(), *n)))
        }
        "category" => category_distribution(&chart_rows(&data, &scope).await),
        "time" => tickets_over_time(&chart_rows(&data, &scope).await, Utc::now()),
        "resolution" if identity.is_admin() => resolution_time(&chart_rows(&data, &scope).await),
        other => {
            tracing::debug!("Unknown chart type {:?}", other);
            json!({})
        }
    };
    Ok(Outcome::Json(chart))
}

async fn status_counts(data: &DataClient, scope: &Filter) -> Vec<(Status, u64)> {
    let mut counts = Vec::with_capacity(Status::ALL.len());
    for status in Status::ALL {
        counts.push((status, data.count(&scope.clone().where_eq("status", status.as_str())).await));
    }
    counts
}

async fn priority_counts(data: &DataClient, scope: &Filter) -> Vec<(Priority, u64)> {
    let mut counts = Vec::with_capacity(Priority::ALL.len());
    for priority in Priority::ALL {
        counts.push((priority, data.count(&scope.clone().where_eq("priority", priority.as_str())).await));
    }
    counts
}

/// The columns the aggregate charts are computed from.
async fn chart_rows(data: &DataClient, scope: &Filter) -> Vec<Row> {
    let columns = ["status", "category", "created_at", "resolved_at"];
    data.fetch_all(&scope.clone().select(columns.iter().map(|c| c.to_string()).collect()))
        .await
}

fn distribution<L, N>(pairs: impl Iterator<Item = (L, N)>) -> Value
where
    L: Into<Value>,
    N: Into<Value>,
{
    let (labels, data): (Vec<Value>, Vec<Value>) = pairs.map(|(l, n)| (l.into(), n.into())).unzip();
    json!({ "labels": labels, "data": data })
}

fn str_field<'r>(row: &'r Row, key: &str) -> Option<&'r str> {
    row.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.with_timezone(&Utc))
}

/// Largest categories first, at most ten.
fn category_distribution(rows: &[Row]) -> Value {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for category in rows.iter().filter_map(|row| str_field(row, "category")) {
        *counts.entry(category).or_default() += 1;
    }
    let mut counts: Vec<(&str, u64)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    counts.truncate(TOP_CATEGORIES);
    distribution(counts.into_iter())
}

/// Tickets opened per day over the trailing window, oldest day first.
fn tickets_over_time(rows: &[Row], now: DateTime<Utc>) -> Value {
    let since = now - Duration::days(TIMELINE_DAYS);
    let mut per_day: BTreeMap<String, u64> = BTreeMap::new();
    for created in rows.iter().filter_map(|row| str_field(row, "created_at")).filter_map(parse_time) {
        if created >= since {
            *per_day.entry(created.format("%Y-%m-%d").to_string()).or_default() += 1;
        }
    }
    distribution(per_day.into_iter())
}

/// Mean hours from open to resolution per category, slowest first.
fn resolution_time(rows: &[Row]) -> Value {
    let mut hours: HashMap<&str, (f64, u32)> = HashMap::new();
    for row in rows {
        let finished = str_field(row, "status")
            .and_then(|s| s.parse::<Status>().ok())
            .map(|s| s.is_terminal())
            .unwrap_or(false);
        let (Some(category), Some(created), Some(resolved)) = (
            str_field(row, "category"),
            str_field(row, "created_at").and_then(parse_time),
            str_field(row, "resolved_at").and_then(parse_time),
        ) else {
            continue;
        };
        if !finished {
            continue;
        }
        let entry = hours.entry(category).or_insert((0.0, 0));
        entry.0 += (resolved - created).num_minutes() as f64 / 60.0;
        entry.1 += 1;
    }

    let mut averages: Vec<(&str, f64)> = hours
        .into_iter()
        .map(|(category, (sum, n))| (category, (sum / n as f64 * 10.0).round() / 10.0))
        .collect();
    averages.sort_by(|a, b| b.1.total_cmp(&a.1));
    averages.truncate(TOP_CATEGORIES);
    distribution(averages.into_iter())
}
