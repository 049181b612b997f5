//! CSRF tokens, login throttling, password hashing and input hygiene.

pub mod csrf;
pub mod password;
pub mod rate_limit;
pub mod sanitize;

pub use csrf::{generate_csrf_token, verify_csrf_token};
pub use password::{hash_password, validate_password, verify_password, PasswordError};
pub use rate_limit::{RateLimitEntry, RateLimiter};
pub use sanitize::{escape_html_once, sanitize_input, sanitize_str, validate_email};
