use crate::session::Session;

/// Return the session's CSRF token, issuing 32 random bytes (hex) on first use.
pub fn generate_csrf_token(session: &mut Session) -> String {
    if let Some(token) = session.csrf_token() {
        return token.to_string();
    }
    let token = hex::encode(rand::random::<[u8; 32]>());
    session.set_csrf_token(token.clone());
    token
}

/// True only when a token was issued and `token` matches it exactly.
pub fn verify_csrf_token(session: &Session, token: &str) -> bool {
    match session.csrf_token() {
        Some(expected) if !token.is_empty() => constant_time_eq(expected.as_bytes(), token.as_bytes()),
        _ => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
