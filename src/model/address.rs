//! SMTP envelope path parsing (RFC 5321 §4.1.2).

/// Reduce a `MAIL FROM:` / `RCPT TO:` argument to the bare mailbox.
///
/// # Examples
/// - `"<user@example.com>"` → `Some("user@example.com")`
/// - `"<user@example.com> SIZE=1024"` → `Some("user@example.com")`
/// - `"user@example.com"` → `Some("user@example.com")`
/// - `"<>"` → `Some("")` (null reverse-path)
/// - `"<@relay.example:user@example.com>"` → `Some("user@example.com")`
///
/// Returns `None` when the argument is empty or the angle brackets are unbalanced.
pub fn parse_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix('<') {
        let end = find_closing_angle(rest)?;
        let inner = rest[..end].trim();
        return Some(strip_source_route(inner).to_string());
    }

    // Bare path: everything up to the first ESMTP parameter
    let bare = trimmed.split_whitespace().next().unwrap_or("");
    if bare.contains('<') || bare.contains('>') {
        return None;
    }
    Some(strip_source_route(bare).to_string())
}

/// Position of the `>` closing the path, skipping quoted local parts.
fn find_closing_angle(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '>' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Drop an obsolete source route: `@a,@b:user@host` → `user@host`.
fn strip_source_route(path: &str) -> &str {
    if path.starts_with('@') {
        if let Some(colon) = path.find(':') {
            return &path[colon + 1..];
        }
    }
    path
}
