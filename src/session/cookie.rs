use axum::http::{header, HeaderMap};

/// Attributes of the session cookie.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub name: String,
    pub secure: bool,
}

impl CookieOptions {
    /// Session id carried by the request, if it has a well-formed one.
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit()))
    }

    pub fn set_value(&self, id: &str) -> String {
        let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Strict", self.name, id);
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn expire_value(&self) -> String {
        let mut cookie = format!(
            "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict",
            self.name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}
