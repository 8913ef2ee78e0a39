//! String-literal encoding for statement text sent to the backing store.
//!
//! Quotes are doubled and backslashes escaped. Newline, carriage return and
//! tab are legitimate content and pass through untouched; every other
//! control character (NUL included) is dropped because it can terminate or
//! corrupt a statement.

/// Control characters allowed through unchanged.
const ALLOWED_CONTROL: [char; 3] = ['\n', '\r', '\t'];

/// Escape `raw` for use between single quotes.
pub fn escape_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() && !ALLOWED_CONTROL.contains(&c) => {}
            c => out.push(c),
        }
    }
    out
}

/// Escape and wrap in single quotes.
pub fn quote_literal(raw: &str) -> String {
    format!("'{}'", escape_literal(raw))
}
