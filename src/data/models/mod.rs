pub mod comment;
pub mod ticket;
pub mod user;

pub use comment::Comment;
pub use ticket::{Priority, Status, Ticket};
pub use user::User;

use chrono::{SecondsFormat, Utc};

/// Tables of the canonical schema (see `sql/schema.sql`).
pub const TICKETS: &str = "tickets";
pub const COMMENTS: &str = "ticket_comments";
pub const USERS: &str = "users";

/// Row timestamp in the format every backend stores: RFC 3339, UTC, microseconds.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
