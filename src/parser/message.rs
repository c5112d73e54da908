//! Whole-message parsing: split headers from body, normalize, and decode.

use tracing::debug;

use crate::error::Result;
use crate::model::mail::{ContentTypeInfo, DecodeResult, DecodedHeaders, RawMessage};
use crate::parser::header::{self, decode_header_bytes, into_header_map, parse_header_block};
use crate::parser::mime;

/// Everything the router needs from one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMail {
    pub headers: DecodedHeaders,
    pub content_type: ContentTypeInfo,
    pub body: DecodeResult,
}

/// Parse raw message bytes into a [`ParsedMail`].
///
/// Fails only when the header block is malformed or the top-level
/// `Content-Type` is missing or unparsable; body problems degrade to partial
/// or empty results.
pub fn parse_mail(data: &[u8]) -> Result<ParsedMail> {
    let raw = read_message(data)?;
    let normalized = header::normalize(&raw)?;
    let body = mime::decode_message(&raw, &normalized.content_type);

    debug!(
        text_len = body.text.len(),
        html_len = body.html.len(),
        multipart = body.is_multipart,
        "Decoded message body"
    );

    Ok(ParsedMail {
        headers: normalized.decoded,
        content_type: normalized.content_type,
        body,
    })
}

/// Split a message into its header map and body.
///
/// A message without a blank line is all headers with an empty body.
pub fn read_message(data: &[u8]) -> Result<RawMessage> {
    let (header_bytes, body) = match find_header_end(data) {
        Some((end, body_start)) => (&data[..end], &data[body_start..]),
        None => (data, &[][..]),
    };

    let text = decode_header_bytes(header_bytes);
    let headers = into_header_map(parse_header_block(&text)?);

    Ok(RawMessage {
        headers,
        body: body.to_vec(),
    })
}

/// Locate the blank line ending the header block.
///
/// Returns `(header_end, body_start)`: the headers are `data[..header_end]`
/// and the body starts at `body_start`.
fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    // No headers at all
    if data.starts_with(b"\r\n") {
        return Some((0, 2));
    }
    if data.starts_with(b"\n") {
        return Some((0, 1));
    }

    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some((i, i + 2));
        }
        if i + 3 < data.len()
            && data[i] == b'\r'
            && data[i + 1] == b'\n'
            && data[i + 2] == b'\r'
            && data[i + 3] == b'\n'
        {
            return Some((i, i + 4));
        }
    }
    None
}
