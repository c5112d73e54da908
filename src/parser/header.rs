//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), and header normalization.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::model::mail::{ContentTypeInfo, DecodedHeaders, RawMessage};
use crate::parser::content_type::parse_content_type;

/// Header fields needed to route a message, plus its parsed `Content-Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHeaders {
    pub decoded: DecodedHeaders,
    pub content_type: ContentTypeInfo,
}

/// Decode `From`, `To`, and `Subject`, and parse `Content-Type`.
///
/// Encoded-word failures fall back to the raw header value. A missing or
/// unparsable `Content-Type` is an error: the body cannot be interpreted
/// without it.
pub fn normalize(msg: &RawMessage) -> Result<NormalizedHeaders> {
    let from_display = decode_header_value("from", msg.header("from").unwrap_or_default());
    let to_display = decode_header_value("to", msg.header("to").unwrap_or_default());
    let subject = decode_header_value("subject", msg.header("subject").unwrap_or_default());

    let raw_content_type = msg.header("content-type").unwrap_or_default();

    debug!(
        from = %from_display,
        to = %to_display,
        date = msg.header("date").unwrap_or_default(),
        subject = %subject,
        content_type = raw_content_type,
        "Message headers"
    );

    let content_type = parse_content_type(raw_content_type)?;

    Ok(NormalizedHeaders {
        decoded: DecodedHeaders {
            subject,
            from_display,
            to_display,
        },
        content_type,
    })
}

/// Decode one header value, keeping the raw text if any encoded-word fails.
fn decode_header_value(name: &str, raw: &str) -> String {
    match try_decode_encoded_words(raw) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(header = name, value = raw, error = %e, "Keeping undecoded header value");
            raw.to_string()
        }
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub(crate) fn decode_header_bytes(bytes: &[u8]) -> String {
    // Strip BOM if present
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Parse a header block: unfold continuation lines and split `name: value`.
///
/// Returns `(lowercase_name, value)` pairs in document order. A line that is
/// neither a continuation nor contains a colon is an error.
pub(crate) fn parse_header_block(text: &str) -> Result<Vec<(String, String)>> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match result.last_mut() {
                Some(last) => {
                    last.1.push(' ');
                    last.1.push_str(line.trim());
                }
                None => {
                    return Err(BridgeError::MalformedMessage(format!(
                        "continuation line before any header: {line:?}"
                    )))
                }
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(BridgeError::MalformedMessage(format!(
                    "malformed header line: {line:?}"
                )));
            }
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name.to_ascii_lowercase(), value));
        } else {
            return Err(BridgeError::MalformedMessage(format!(
                "malformed header line: {line:?}"
            )));
        }
    }

    Ok(result)
}

/// Collapse header pairs into a map where the last occurrence of a name wins.
pub(crate) fn into_header_map(pairs: Vec<(String, String)>) -> BTreeMap<String, String> {
    pairs.into_iter().collect()
}

/// Why an encoded-word could not be decoded.
#[derive(Error, Debug)]
pub enum EncodedWordError {
    #[error("invalid base64 in encoded-word: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid Q-encoding near '{0}'")]
    QEncoding(String),

    #[error("unknown charset '{0}'")]
    UnknownCharset(String),
}

/// Decode RFC 2047 encoded-words in a header value, keeping the input on failure.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
pub fn decode_encoded_words(input: &str) -> String {
    try_decode_encoded_words(input).unwrap_or_else(|_| input.to_string())
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Segments that are not structurally encoded-words are copied literally. A
/// well-formed word whose payload or charset cannot be decoded is an error.
pub fn try_decode_encoded_words(input: &str) -> std::result::Result<String, EncodedWordError> {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // If the gap between two encoded words is only whitespace, skip it (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        match split_encoded_word(after_start) {
            Some(word) => {
                result.push_str(&word.decode()?);
                remaining = &after_start[word.consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    Ok(result)
}

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    text: &'a str,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

impl EncodedWord<'_> {
    fn decode(&self) -> std::result::Result<String, EncodedWordError> {
        let bytes = if self.encoding.eq_ignore_ascii_case("B") {
            STANDARD.decode(self.text)?
        } else {
            decode_q_encoding(self.text)?
        };
        decode_charset(self.charset, &bytes)
    }
}

/// Split `charset?encoding?text?=` off the front of `s`.
fn split_encoded_word(s: &str) -> Option<EncodedWord<'_>> {
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let text = &rest2[..end];

    let well_formed = !charset.is_empty()
        && !charset.contains(char::is_whitespace)
        && (encoding.eq_ignore_ascii_case("B") || encoding.eq_ignore_ascii_case("Q"))
        && !text.contains(char::is_whitespace);
    if !well_formed {
        return None;
    }

    Some(EncodedWord {
        charset,
        encoding,
        text,
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> std::result::Result<Vec<u8>, EncodedWordError> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => {
                let hi = bytes.get(i + 1).and_then(|b| hex_value(*b));
                let lo = bytes.get(i + 2).and_then(|b| hex_value(*b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        result.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => return Err(EncodedWordError::QEncoding(input[i..].to_string())),
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    Ok(result)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode bytes using a named charset.
fn decode_charset(charset: &str, bytes: &[u8]) -> std::result::Result<String, EncodedWordError> {
    // RFC 2231 allows a language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => match encoding_rs::Encoding::for_label(charset.as_bytes()) {
            Some(encoding) => {
                let (decoded, _, had_errors) = encoding.decode(bytes);
                if had_errors {
                    warn!(charset = charset, "Replacement characters in encoded-word");
                }
                Ok(decoded.into_owned())
            }
            None => Err(EncodedWordError::UnknownCharset(charset.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(headers: &[(&str, &str)]) -> RawMessage {
        RawMessage {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SGVsbG8=?="), "Hello");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        let input = "=?ISO-8859-1?Q?caf=E9?=";
        assert_eq!(decode_encoded_words(input), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
    }

    #[test]
    fn test_plain_value_unchanged() {
        assert_eq!(decode_encoded_words("Weekly report"), "Weekly report");
    }

    #[test]
    fn test_unterminated_word_kept_literally() {
        let input = "Price =?UTF-8?B?SGVsbG8";
        assert_eq!(try_decode_encoded_words(input).unwrap(), input);
    }

    #[test]
    fn test_invalid_base64_word_is_error() {
        assert!(matches!(
            try_decode_encoded_words("=?UTF-8?B?!!!!?="),
            Err(EncodedWordError::Base64(_))
        ));
        assert_eq!(decode_encoded_words("=?UTF-8?B?!!!!?="), "=?UTF-8?B?!!!!?=");
    }

    #[test]
    fn test_unknown_charset_is_error() {
        assert!(matches!(
            try_decode_encoded_words("=?x-klingon?Q?abc?="),
            Err(EncodedWordError::UnknownCharset(_))
        ));
    }

    #[test]
    fn test_bad_q_hex_is_error() {
        assert!(matches!(
            try_decode_encoded_words("=?UTF-8?Q?caf=ZZ?="),
            Err(EncodedWordError::QEncoding(_))
        ));
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        let input = "=?Windows-1252?Q?M=FCller?=";
        assert_eq!(decode_encoded_words(input), "Müller");
    }

    #[test]
    fn test_decode_utf8_base64_japanese() {
        // 山田太郎
        let input = "=?UTF-8?B?5bGx55Sw5aSq6YOO?=";
        assert_eq!(decode_encoded_words(input), "山田太郎");
    }

    #[test]
    fn test_parse_header_block_unfolds() {
        let text = "Subject: This is a long\n\tsubject line\nFrom: user@example.com\n";
        let headers = parse_header_block(text).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "subject");
        assert_eq!(headers[0].1, "This is a long subject line");
    }

    #[test]
    fn test_parse_header_block_rejects_garbage_line() {
        let text = "Subject: ok\nthis is not a header\n";
        assert!(matches!(
            parse_header_block(text),
            Err(BridgeError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_header_map_last_value_wins() {
        let pairs = parse_header_block("X-Tag: one\nX-Tag: two\n").unwrap();
        let map = into_header_map(pairs);
        assert_eq!(map.get("x-tag").map(String::as_str), Some("two"));
    }

    #[test]
    fn test_normalize_decodes_fields() {
        let msg = raw(&[
            ("from", "=?UTF-8?Q?Jos=C3=A9?= <jose@example.com>"),
            ("to", "ops@example.com"),
            ("subject", "=?UTF-8?B?SGVsbG8=?="),
            ("content-type", "multipart/mixed; boundary=\"B1\""),
        ]);
        let normalized = normalize(&msg).unwrap();
        assert_eq!(normalized.decoded.subject, "Hello");
        assert_eq!(normalized.decoded.from_display, "José <jose@example.com>");
        assert_eq!(normalized.decoded.to_display, "ops@example.com");
        assert_eq!(normalized.content_type.media_type, "multipart/mixed");
        assert_eq!(normalized.content_type.boundary(), Some("B1"));
    }

    #[test]
    fn test_normalize_keeps_raw_subject_on_failure() {
        let msg = raw(&[
            ("subject", "=?x-unknown?B?SGVsbG8=?="),
            ("content-type", "text/plain"),
        ]);
        let normalized = normalize(&msg).unwrap();
        assert_eq!(normalized.decoded.subject, "=?x-unknown?B?SGVsbG8=?=");
    }

    #[test]
    fn test_normalize_missing_content_type_is_fatal() {
        let msg = raw(&[("subject", "hi")]);
        assert!(matches!(
            normalize(&msg),
            Err(BridgeError::ContentType { .. })
        ));
    }

    #[test]
    fn test_decode_header_bytes_latin1_fallback() {
        assert_eq!(decode_header_bytes(b"Subject: caf\xE9"), "Subject: café");
    }
}
