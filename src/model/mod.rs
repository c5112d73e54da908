//! Core data model types for envelopes, messages, and decode results.

pub mod address;
pub mod mail;
