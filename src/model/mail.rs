//! Core message, header, and decode-result types.

use std::collections::BTreeMap;

/// One completed SMTP transaction, as handed over by the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Bare reverse-path address (empty for the null path `<>`).
    pub sender: String,

    /// Bare forward-path addresses, in `RCPT TO` order.
    pub recipients: Vec<String>,

    /// Message content (headers + body), already dot-unstuffed.
    pub data: Vec<u8>,
}

/// A message split into its header map and raw body.
///
/// Header names are stored lowercase. When a header appears more than once,
/// the last value wins.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    /// Unfolded header values keyed by lowercase name.
    pub headers: BTreeMap<String, String>,

    /// Everything after the first blank line.
    pub body: Vec<u8>,
}

impl RawMessage {
    /// Look up a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Human-readable header fields with RFC 2047 encoded-words resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DecodedHeaders {
    pub subject: String,
    pub from_display: String,
    pub to_display: String,
}

/// A parsed `Content-Type` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypeInfo {
    /// Lowercase `type/subtype`, e.g. `"multipart/mixed"`.
    pub media_type: String,

    /// Parameters with lowercase keys and unquoted values.
    pub parameters: BTreeMap<String, String>,
}

impl ContentTypeInfo {
    /// Whether this is a `multipart/*` type.
    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }

    /// The `boundary` parameter, if any.
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }
}

/// `Content-Transfer-Encoding` of a MIME part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `7bit`, or no header at all.
    #[default]
    SevenBit,
    Base64,
    QuotedPrintable,
    /// Anything else (`8bit`, `binary`, unknown tokens). The body is used as-is.
    Other(String),
}

impl TransferEncoding {
    /// Classify a header value (case-insensitive, surrounding whitespace ignored).
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return Self::SevenBit;
        };
        match value.to_ascii_uppercase().as_str() {
            "" | "7BIT" => Self::SevenBit,
            "BASE64" => Self::Base64,
            "QUOTED-PRINTABLE" => Self::QuotedPrintable,
            _ => Self::Other(value.to_string()),
        }
    }
}

/// Text and HTML bodies extracted from a message.
///
/// When `is_multipart` is false, both `html` and `text` are empty: non-multipart
/// messages are never body-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DecodeResult {
    pub html: String,
    pub text: String,
    pub is_multipart: bool,
}
