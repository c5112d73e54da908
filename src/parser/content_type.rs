//! `Content-Type` parsing (RFC 2045 §5.1).

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::model::mail::ContentTypeInfo;

/// Parse a `Content-Type` value into a lowercase media type and its parameters.
///
/// The media type must be `token` or `token/token`; anything else (including an
/// empty value) is an error. Malformed parameters are skipped, and when a
/// parameter repeats the first occurrence is kept.
pub fn parse_content_type(value: &str) -> Result<ContentTypeInfo> {
    let (media, params) = match value.find(';') {
        Some(pos) => (&value[..pos], &value[pos + 1..]),
        None => (value, ""),
    };

    let media_type = parse_media_type(media).map_err(|reason| BridgeError::ContentType {
        value: value.to_string(),
        reason,
    })?;

    Ok(ContentTypeInfo {
        media_type,
        parameters: parse_parameters(params),
    })
}

fn parse_media_type(media: &str) -> std::result::Result<String, String> {
    let media = media.trim();
    if media.is_empty() {
        return Err("no media type".to_string());
    }

    let (main, sub) = match media.split_once('/') {
        Some((main, sub)) => (main.trim(), Some(sub.trim())),
        None => (media, None),
    };
    if !is_token(main) {
        return Err(format!("invalid media type token '{main}'"));
    }
    if let Some(sub) = sub {
        if !is_token(sub) {
            return Err(format!("invalid media subtype token '{sub}'"));
        }
    }

    Ok(media
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase())
}

fn parse_parameters(mut rest: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
        if rest.is_empty() {
            break;
        }

        let Some(eq) = rest.find('=') else {
            debug!(segment = rest, "Skipping Content-Type parameter without '='");
            break;
        };
        if let Some(semi) = rest[..eq].find(';') {
            debug!(segment = &rest[..semi], "Skipping Content-Type parameter without '='");
            rest = &rest[semi..];
            continue;
        }
        let key = rest[..eq].trim().to_ascii_lowercase();
        let after_eq = rest[eq + 1..].trim_start();

        let (value, consumed) = if let Some(quoted) = after_eq.strip_prefix('"') {
            match read_quoted(quoted) {
                Some((value, used)) => (Some(value), used + 1),
                None => (None, after_eq.len()),
            }
        } else {
            let end = after_eq.find(';').unwrap_or(after_eq.len());
            let token = after_eq[..end].trim();
            // Lenient: real-world unquoted boundaries often contain '='
            let value = (!token.is_empty()
                && !token.contains(|c: char| c.is_whitespace() || c == '"'))
            .then(|| token.to_string());
            (value, end)
        };
        rest = &after_eq[consumed..];

        match value {
            Some(value) if is_token(&key) => {
                params.entry(key).or_insert(value);
            }
            _ => debug!(key = %key, "Skipping malformed Content-Type parameter"),
        }
    }

    params
}

/// Read a quoted-string body (after the opening quote).
///
/// Returns the unescaped value and the bytes consumed including the closing quote.
fn read_quoted(s: &str) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if escaped {
            value.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            return Some((value, i + 1));
        } else {
            value.push(ch);
        }
    }
    None
}

/// RFC 2045 token: printable ASCII except space and tspecials.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_type() {
        let ct = parse_content_type("text/plain").unwrap();
        assert_eq!(ct.media_type, "text/plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_parse_lowercases_type_and_keys() {
        let ct = parse_content_type("Multipart/Mixed; BOUNDARY=\"Abc\"").unwrap();
        assert_eq!(ct.media_type, "multipart/mixed");
        // Values keep their case: boundaries are case-sensitive
        assert_eq!(ct.boundary(), Some("Abc"));
    }

    #[test]
    fn test_parse_multiple_params() {
        let ct =
            parse_content_type("text/plain; charset=utf-8; format=flowed; delsp=yes").unwrap();
        assert_eq!(ct.parameters.get("charset").unwrap(), "utf-8");
        assert_eq!(ct.parameters.get("format").unwrap(), "flowed");
        assert_eq!(ct.parameters.get("delsp").unwrap(), "yes");
    }

    #[test]
    fn test_parse_quoted_value_with_semicolon_and_escape() {
        let ct = parse_content_type(r#"multipart/mixed; boundary="a;b\"c"; x=1"#).unwrap();
        assert_eq!(ct.boundary(), Some("a;b\"c"));
        assert_eq!(ct.parameters.get("x").unwrap(), "1");
    }

    #[test]
    fn test_parse_skips_malformed_params() {
        let ct = parse_content_type("text/html; junk; charset=utf-8").unwrap();
        assert_eq!(ct.media_type, "text/html");
        assert!(!ct.parameters.contains_key("junk"));
        assert_eq!(ct.parameters.get("charset").unwrap(), "utf-8");
    }

    #[test]
    fn test_unquoted_boundary_with_equals() {
        let ct = parse_content_type("multipart/alternative; boundary=----=_Part_42").unwrap();
        assert_eq!(ct.boundary(), Some("----=_Part_42"));
    }

    #[test]
    fn test_duplicate_param_first_wins() {
        let ct = parse_content_type("multipart/mixed; boundary=one; boundary=two").unwrap();
        assert_eq!(ct.boundary(), Some("one"));
    }

    #[test]
    fn test_missing_type_is_error() {
        assert!(parse_content_type("").is_err());
        assert!(parse_content_type("   ; charset=utf-8").is_err());
    }

    #[test]
    fn test_invalid_type_is_error() {
        assert!(parse_content_type("text/").is_err());
        assert!(parse_content_type("te xt/plain").is_err());
        assert!(parse_content_type("text/pl@in").is_err());
    }

    #[test]
    fn test_type_without_subtype_accepted() {
        let ct = parse_content_type("text").unwrap();
        assert_eq!(ct.media_type, "text");
    }
}
