use serde_json::Value;

/// Trim and HTML-escape every string leaf of a JSON value.
pub fn sanitize_input(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape_html(s.trim())),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_input).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, sanitize_input(v))).collect()),
        other => other,
    }
}

pub fn sanitize_str(input: &str) -> String {
    escape_html(input.trim())
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

const ENTITIES: [&str; 6] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#039;", "&#39;"];

/// Escape for HTML output, leaving entities that are already escaped alone.
/// Stored values went through [`sanitize_input`] on the way in.
pub fn escape_html_once(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(c) = rest.chars().next() {
        if c == '&' {
            if let Some(entity) = ENTITIES.iter().find(|e| rest.starts_with(*e)) {
                out.push_str(entity);
                rest = &rest[entity.len()..];
                continue;
            }
        }
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Pragmatic address check: one `@`, a non-empty local part, and a dotted domain.
pub fn validate_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.contains('@') || email.len() > 254 {
        return false;
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
