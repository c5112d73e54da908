//! MIME multipart decoding: part framing, transfer decoding, and text/HTML extraction.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::model::mail::{ContentTypeInfo, DecodeResult, RawMessage, TransferEncoding};
use crate::parser::content_type::parse_content_type;
use crate::parser::header::{decode_header_bytes, into_header_map, parse_header_block};

/// Maximum depth for recursive multipart parsing (to prevent stack overflow on adversarial input).
pub const MAX_DEPTH: usize = 10;

/// Decode the body of a message whose headers have already been normalized.
///
/// Non-multipart messages are not body-decoded: both slots stay empty and
/// `is_multipart` is false.
pub fn decode_message(msg: &RawMessage, content_type: &ContentTypeInfo) -> DecodeResult {
    if !content_type.is_multipart() {
        debug!(media_type = %content_type.media_type, "Not a multipart MIME message");
        return DecodeResult::default();
    }

    match content_type.boundary() {
        Some(boundary) => decode(&msg.body, boundary),
        None => {
            warn!(
                media_type = %content_type.media_type,
                "Multipart message without a boundary parameter"
            );
            DecodeResult {
                is_multipart: true,
                ..Default::default()
            }
        }
    }
}

/// Walk a multipart body and extract its `text/plain` and `text/html` content.
///
/// Parts are visited in document order. For each slot the last matching leaf
/// wins. The first nested `multipart/*` part ends enumeration at this level:
/// the result of decoding that part replaces everything collected so far, and
/// its siblings are never visited.
///
/// Read errors stop enumeration and return what was collected; they never
/// fail the call.
pub fn decode(body: &[u8], boundary: &str) -> DecodeResult {
    decode_level(body, boundary, 0)
}

fn decode_level(body: &[u8], boundary: &str, depth: usize) -> DecodeResult {
    let mut result = DecodeResult {
        is_multipart: true,
        ..Default::default()
    };
    let mut reader = MultipartReader::new(body, boundary);

    loop {
        let part = match reader.next_part() {
            Ok(Some(part)) => part,
            Ok(None) => break,
            Err(e) => {
                warn!(boundary = boundary, error = %e, "Error going through the MIME parts");
                break;
            }
        };

        match part.into_node() {
            PartNode::Nested {
                boundary: Some(nested),
                body,
            } => {
                if depth + 1 >= MAX_DEPTH {
                    warn!(depth = depth + 1, "Multipart nesting too deep, skipping branch");
                    return DecodeResult {
                        is_multipart: true,
                        ..Default::default()
                    };
                }
                return decode_level(body, &nested, depth + 1);
            }
            PartNode::Nested { boundary: None, .. } => {
                warn!(depth = depth + 1, "Nested multipart without a boundary parameter");
                return DecodeResult {
                    is_multipart: true,
                    ..Default::default()
                };
            }
            PartNode::Leaf(leaf) => {
                let decoded = decode_leaf(&leaf);
                let media_type = leaf.content_type.media_type.as_str();
                debug!(
                    media_type = media_type,
                    encoding = ?leaf.transfer_encoding,
                    size = decoded.len(),
                    "Decoded leaf part"
                );
                if media_type.contains("text/html") {
                    result.html = String::from_utf8_lossy(&decoded).into_owned();
                } else if media_type.contains("text/plain") {
                    result.text = String::from_utf8_lossy(&decoded).into_owned();
                }
            }
        }
    }

    result
}

/// Undo the part's transfer encoding.
///
/// A body that fails to decode is logged and replaced by an empty one.
pub fn decode_leaf<'a>(part: &MimePart<'a>) -> Cow<'a, [u8]> {
    match part.transfer_encoding {
        TransferEncoding::Base64 => {
            let compact: Vec<u8> = part
                .raw_body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match STANDARD.decode(&compact) {
                Ok(bytes) => Cow::Owned(bytes),
                Err(e) => {
                    warn!(
                        error = %e,
                        raw = %String::from_utf8_lossy(part.raw_body),
                        "Error decoding base64"
                    );
                    Cow::Owned(Vec::new())
                }
            }
        }
        TransferEncoding::QuotedPrintable => {
            match quoted_printable::decode(part.raw_body, quoted_printable::ParseMode::Robust) {
                Ok(bytes) => Cow::Owned(bytes),
                Err(e) => {
                    warn!(
                        error = %e,
                        raw = %String::from_utf8_lossy(part.raw_body),
                        "Error decoding quoted-printable"
                    );
                    Cow::Owned(Vec::new())
                }
            }
        }
        TransferEncoding::SevenBit | TransferEncoding::Other(_) => Cow::Borrowed(part.raw_body),
    }
}

/// One part of a multipart body, borrowed from the stream being decoded.
#[derive(Debug, Clone)]
pub struct MimePart<'a> {
    /// Parsed `Content-Type`; empty media type when absent or unparsable.
    pub content_type: ContentTypeInfo,
    pub transfer_encoding: TransferEncoding,
    /// Body exactly as framed, still transfer-encoded.
    pub raw_body: &'a [u8],
}

enum PartNode<'a> {
    Nested {
        boundary: Option<String>,
        body: &'a [u8],
    },
    Leaf(MimePart<'a>),
}

impl<'a> MimePart<'a> {
    fn into_node(self) -> PartNode<'a> {
        if self.content_type.is_multipart() {
            PartNode::Nested {
                boundary: self.content_type.boundary().map(String::from),
                body: self.raw_body,
            }
        } else {
            PartNode::Leaf(self)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Part,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Preamble,
    InParts,
    Done,
}

/// Frames a multipart body into parts (RFC 2046 §5.1.1).
///
/// Accepts both CRLF and bare LF line endings. The preamble and epilogue are
/// ignored.
pub struct MultipartReader<'a> {
    data: &'a [u8],
    pos: usize,
    dash_boundary: Vec<u8>,
    state: ReaderState,
}

impl<'a> MultipartReader<'a> {
    pub fn new(data: &'a [u8], boundary: &str) -> Self {
        let mut dash_boundary = Vec::with_capacity(boundary.len() + 2);
        dash_boundary.extend_from_slice(b"--");
        dash_boundary.extend_from_slice(boundary.as_bytes());
        Self {
            data,
            pos: 0,
            dash_boundary,
            state: ReaderState::Preamble,
        }
    }

    /// Return the next part, `Ok(None)` at the end of the stream.
    ///
    /// A body with no delimiter line at all has no parts. A part whose headers
    /// or body run into the end of the stream, or whose header block is
    /// malformed, is an error.
    pub fn next_part(&mut self) -> Result<Option<MimePart<'a>>> {
        match self.state {
            ReaderState::Done => return Ok(None),
            ReaderState::Preamble => {
                if !self.skip_preamble() {
                    return Ok(None);
                }
            }
            ReaderState::InParts => {}
        }

        let headers = self.read_part_headers()?;
        let raw_body = self.read_part_body()?;

        let content_type = match headers.get("content-type") {
            Some(value) => parse_content_type(value).unwrap_or_else(|e| {
                debug!(error = %e, "Unparsable part Content-Type, treating as untyped");
                ContentTypeInfo::default()
            }),
            None => ContentTypeInfo::default(),
        };
        let transfer_encoding = TransferEncoding::from_header(
            headers.get("content-transfer-encoding").map(String::as_str),
        );

        Ok(Some(MimePart {
            content_type,
            transfer_encoding,
            raw_body,
        }))
    }

    /// Advance past the first delimiter. Returns false if the stream has no parts.
    fn skip_preamble(&mut self) -> bool {
        while self.pos < self.data.len() {
            let (line, next) = self.line_at(self.pos);
            self.pos = next;
            match self.delimiter(line) {
                Some(Delimiter::Part) => {
                    self.state = ReaderState::InParts;
                    return true;
                }
                Some(Delimiter::Close) => break,
                None => {}
            }
        }
        debug!("No opening boundary delimiter found");
        self.state = ReaderState::Done;
        false
    }

    fn read_part_headers(&mut self) -> Result<std::collections::BTreeMap<String, String>> {
        let start = self.pos;
        loop {
            if self.pos >= self.data.len() {
                self.state = ReaderState::Done;
                return Err(BridgeError::MimeError(
                    "unexpected end of stream in part headers".to_string(),
                ));
            }
            let line_start = self.pos;
            let (line, next) = self.line_at(self.pos);
            self.pos = next;
            if line.is_empty() {
                let text = decode_header_bytes(&self.data[start..line_start]);
                let pairs = parse_header_block(&text).map_err(|e| {
                    self.state = ReaderState::Done;
                    BridgeError::MimeError(e.to_string())
                })?;
                return Ok(into_header_map(pairs));
            }
        }
    }

    fn read_part_body(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let mut pos = self.pos;
        while pos < self.data.len() {
            let (line, next) = self.line_at(pos);
            if let Some(kind) = self.delimiter(line) {
                // The line break before the delimiter belongs to the delimiter
                let mut end = pos;
                if end > start {
                    end -= 1;
                    if end > start && self.data[end - 1] == b'\r' {
                        end -= 1;
                    }
                }
                self.pos = next;
                if kind == Delimiter::Close {
                    self.state = ReaderState::Done;
                }
                return Ok(&self.data[start..end]);
            }
            pos = next;
        }
        self.state = ReaderState::Done;
        Err(BridgeError::MimeError(
            "part body not terminated by a boundary delimiter".to_string(),
        ))
    }

    /// The line starting at `pos` without its line ending, and the start of the next line.
    fn line_at(&self, pos: usize) -> (&'a [u8], usize) {
        let data = self.data;
        let rest = &data[pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => {
                let line = &rest[..nl];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                (line, pos + nl + 1)
            }
            None => (rest, data.len()),
        }
    }

    fn delimiter(&self, line: &[u8]) -> Option<Delimiter> {
        let rest = line.strip_prefix(self.dash_boundary.as_slice())?;
        let is_lwsp = |s: &[u8]| s.iter().all(|&b| b == b' ' || b == b'\t');
        if let Some(after) = rest.strip_prefix(b"--") {
            if is_lwsp(after) {
                return Some(Delimiter::Close);
            }
            return None;
        }
        is_lwsp(rest).then_some(Delimiter::Part)
    }
}
