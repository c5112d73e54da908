//! `smtp2mqtt`: accept mail over SMTP and publish it to an MQTT broker.
//!
//! The library holds the message pipeline: header normalization, recursive
//! MIME decoding, the routing decision, and the SMTP and MQTT plumbing around
//! them.

pub mod bus;
pub mod config;
pub mod error;
pub mod forward;
pub mod model;
pub mod parser;
pub mod routing;
pub mod smtp;
