mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::{memory_app, memory_app_with_store, seed_admin, Browser, MOCK_PASSWORD};
use ticketa::data::DataStore;
use ticketa::filter::Filter;

async fn file_ticket(browser: &mut Browser, title: &str, category: &str) -> Result<String> {
    browser.get("/tickets/create").await?;
    let page = browser
        .post(
            "/tickets",
            &[
                ("title", title),
                ("description", "Paper stuck in tray 2"),
                ("priority", "high"),
                ("category", category),
            ],
        )
        .await?;
    assert_eq!(page.status, StatusCode::FOUND);
    Ok(page.location.unwrap_or_default())
}

#[tokio::test]
async fn ticket_lifecycle() -> Result<()> {
    let mut bob = Browser::new(memory_app());
    bob.register("bob", "bob@example.com", "Bob").await?;

    let location = file_ticket(&mut bob, "Printer jam", "Hardware").await?;
    assert_eq!(location, "/tickets/1");

    let page = bob.get("/tickets/1").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("Ticket created successfully!"));
    assert!(page.body.contains("Printer jam"));
    assert!(page.body.contains("No comments yet."));

    let page = bob.get("/tickets").await?;
    assert!(page.body.contains("href=\"/tickets/1\""));

    // Resolve it
    bob.get("/tickets/1/edit").await?;
    let page = bob
        .post(
            "/tickets/1/update",
            &[
                ("title", "Printer jam"),
                ("description", "Paper stuck in tray 2"),
                ("priority", "high"),
                ("category", "Hardware"),
                ("status", "resolved"),
            ],
        )
        .await?;
    assert_eq!(page.location.as_deref(), Some("/tickets/1"));

    let page = bob.get("/tickets/1").await?;
    assert!(page.body.contains("Ticket updated successfully!"));
    assert!(page.body.contains("Status changed from open to resolved"));
    assert!(page.body.contains("<dt>Resolved</dt>"));

    let page = bob.post("/tickets/1/comments", &[("comment", "Works again, thanks")]).await?;
    assert_eq!(page.location.as_deref(), Some("/tickets/1"));
    let page = bob.get("/tickets/1").await?;
    assert!(page.body.contains("Comment added successfully!"));
    assert!(page.body.contains("Works again, thanks"));

    let chart = bob.get("/dashboard/chart-data?type=status").await?.json()?;
    assert_eq!(
        chart,
        json!({ "labels": ["Open", "In Progress", "Resolved", "Closed"], "data": [0, 0, 1, 0] })
    );
    let chart = bob.get("/dashboard/chart-data?type=category").await?.json()?;
    assert_eq!(chart, json!({ "labels": ["Hardware"], "data": [1] }));
    // Resolution times are for administrators only
    let chart = bob.get("/dashboard/chart-data?type=resolution").await?.json()?;
    assert_eq!(chart, json!({}));

    let page = bob.post("/tickets/1/delete", &[]).await?;
    assert_eq!(page.location.as_deref(), Some("/tickets"));
    let page = bob.get("/tickets").await?;
    assert!(page.body.contains("Ticket deleted successfully!"));
    assert!(page.body.contains("No tickets found."));

    let page = bob.get("/tickets/1").await?;
    assert_eq!(page.location.as_deref(), Some("/tickets"));
    let page = bob.get("/tickets").await?;
    assert!(page.body.contains("Ticket not found."));
    Ok(())
}

#[tokio::test]
async fn invalid_ticket_form_is_sent_back() -> Result<()> {
    let mut bob = Browser::new(memory_app());
    bob.register("bob", "bob@example.com", "Bob").await?;

    bob.get("/tickets/create").await?;
    let page = bob
        .post(
            "/tickets",
            &[("title", ""), ("description", "No title"), ("priority", "whenever"), ("category", "Network")],
        )
        .await?;
    assert_eq!(page.location.as_deref(), Some("/tickets/create"));

    let page = bob.get("/tickets/create").await?;
    assert!(page.body.contains("Title is required"));
    assert!(page.body.contains("Invalid priority level"));
    assert!(page.body.contains("No title"));

    let page = bob.get("/tickets").await?;
    assert!(page.body.contains("No tickets found."));
    Ok(())
}

#[tokio::test]
async fn forged_post_creates_nothing() -> Result<()> {
    let mut bob = Browser::new(memory_app());
    bob.register("bob", "bob@example.com", "Bob").await?;

    let page = bob
        .post_raw(
            "/tickets",
            &[
                ("title", "Sneaky"),
                ("description", "x"),
                ("priority", "low"),
                ("category", "Other"),
                ("_token", "not-the-token"),
            ],
            Some("http://localhost:8000/tickets/create"),
        )
        .await?;
    assert_eq!(page.location.as_deref(), Some("/tickets/create"));

    let page = bob.get("/tickets").await?;
    assert!(page.body.contains("Invalid security token. Please try again."));
    assert!(!page.body.contains("Sneaky"));
    Ok(())
}

#[tokio::test]
async fn users_only_reach_their_own_tickets() -> Result<()> {
    let mut bob = Browser::new(memory_app());
    bob.register("bob", "bob@example.com", "Bob").await?;
    file_ticket(&mut bob, "Bob's VPN", "Network").await?;

    let mut eve = Browser::new(bob.app());
    eve.register("eve", "eve@example.com", "Eve").await?;

    let page = eve.get("/tickets").await?;
    assert!(!page.body.contains("href=\"/tickets/1\""));

    let page = eve.get("/tickets/1").await?;
    assert_eq!(page.location.as_deref(), Some("/tickets"));
    let page = eve.get("/tickets").await?;
    assert!(page.body.contains("You do not have permission to view this ticket."));

    eve.post("/tickets/1/delete", &[]).await?;
    let page = eve.get("/tickets").await?;
    assert!(page.body.contains("You do not have permission to delete this ticket."));

    let page = bob.get("/tickets/1").await?;
    assert_eq!(page.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn internal_notes_stay_with_administrators() -> Result<()> {
    let (app, store) = memory_app_with_store();
    seed_admin(&store, "admin", "admin@example.com").await?;

    let mut bob = Browser::new(app.clone());
    bob.register("bob", "bob@example.com", "Bob").await?;
    file_ticket(&mut bob, "Laptop battery", "Hardware").await?;

    let mut admin = Browser::new(app);
    admin.get("/login").await?;
    admin.post("/login", &[("username", "admin"), ("password", MOCK_PASSWORD)]).await?;

    let page = admin.get("/tickets/1").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("name=\"is_internal\""));
    admin
        .post("/tickets/1/comments", &[("comment", "Vendor RMA opened"), ("is_internal", "1")])
        .await?;
    admin.post("/tickets/1/comments", &[("comment", "Replacement on its way")]).await?;

    let page = admin.get("/tickets/1").await?;
    assert!(page.body.contains("Vendor RMA opened"));
    assert!(page.body.contains("<span class=\"badge\">internal</span>"));

    let page = bob.get("/tickets/1").await?;
    assert!(page.body.contains("Replacement on its way"));
    assert!(!page.body.contains("Vendor RMA opened"));
    assert!(!page.body.contains("name=\"is_internal\""));

    // Bob cannot mark his own notes internal
    bob.post("/tickets/1/comments", &[("comment", "Still waiting"), ("is_internal", "1")]).await?;
    let page = bob.get("/tickets/1").await?;
    assert!(page.body.contains("Still waiting"));
    Ok(())
}

#[tokio::test]
async fn ticket_list_filters_and_paginates() -> Result<()> {
    let mut bob = Browser::new(memory_app());
    bob.register("bob", "bob@example.com", "Bob").await?;
    for n in 0..3 {
        file_ticket(&mut bob, &format!("Network issue {}", n), "Network").await?;
    }
    file_ticket(&mut bob, "Broken chair", "Facilities").await?;

    let page = bob.get("/tickets?category=Network&per_page=2").await?;
    assert!(page.body.contains("Page 1 of 2 (3 tickets)"));
    assert!(page.body.contains("href=\"/tickets?category=Network&amp;per_page=2&amp;page=2\""));
    assert!(!page.body.contains("Broken chair"));

    let page = bob.get("/tickets?category=Facilities").await?;
    assert!(page.body.contains("Broken chair"));
    assert!(!page.body.contains("Network issue"));
    Ok(())
}

#[tokio::test]
async fn category_filter_matches_escaped_categories() -> Result<()> {
    let mut bob = Browser::new(memory_app());
    bob.register("bob", "bob@example.com", "Bob").await?;
    file_ticket(&mut bob, "Tunnel keeps dropping", "Network & VPN").await?;
    file_ticket(&mut bob, "Broken chair", "Facilities").await?;
    file_ticket(&mut bob, "Tunnel refuses certificate", "Network & VPN").await?;

    let page = bob.get("/tickets?category=Network+%26+VPN&per_page=1").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("Tunnel refuses certificate"));
    assert!(!page.body.contains("Broken chair"));
    assert!(page.body.contains("Page 1 of 2 (2 tickets)"));
    assert!(page.body.contains("href=\"/tickets?category=Network+%26+VPN&amp;per_page=1&amp;page=2\""));
    // The dropdown keeps the choice selected
    assert!(page.body.contains("<option value=\"Network &amp; VPN\" selected>"));
    Ok(())
}

#[tokio::test]
async fn ticket_input_is_escaped_once_on_the_way_in() -> Result<()> {
    let (app, store) = memory_app_with_store();
    let mut bob = Browser::new(app);
    bob.register("bob", "bob@example.com", "Bob").await?;
    file_ticket(&mut bob, "  <b>Urgent</b> & \"now\" ", "Hardware").await?;

    let stored = store.fetch_one(&Filter::new("tickets").where_eq("id", 1)).await?.expect("ticket stored");
    assert_eq!(stored.get("title"), Some(&json!("&lt;b&gt;Urgent&lt;/b&gt; &amp; &quot;now&quot;")));

    let page = bob.get("/tickets/1").await?;
    assert!(page.body.contains("&lt;b&gt;Urgent&lt;/b&gt; &amp; &quot;now&quot;"));
    assert!(!page.body.contains("<b>Urgent"));
    assert!(!page.body.contains("&amp;lt;"));
    Ok(())
}
