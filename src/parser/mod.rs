//! Email parsing: header normalization, Content-Type parsing, and MIME decoding.

pub mod content_type;
pub mod header;
pub mod message;
pub mod mime;
