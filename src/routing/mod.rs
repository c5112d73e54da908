//! Routing decision: choose the outbound topic and payload for a decoded message.

pub mod topic;

use serde::Serialize;
use tracing::debug;

use crate::config::RoutingConfig;
use crate::error::Result;
use crate::model::mail::{DecodeResult, DecodedHeaders, Envelope};
use topic::{MqttTopicSanitizer, TopicSanitizer};

/// How the payload was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// JSON object with subject, sender, recipients, text, and html.
    StructuredJson,
    /// The plain-text body alone.
    RawText,
}

/// Where and what to publish for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub topic: String,
    pub payload: Vec<u8>,
    pub encoding: PayloadEncoding,
}

/// Field order here is the field order on the wire.
#[derive(Serialize)]
struct MailJson<'a> {
    subject: &'a str,
    sender: &'a str,
    recipients: &'a [String],
    text: &'a str,
    html: &'a str,
}

/// Builds [`RoutingDecision`]s from a fixed routing configuration.
pub struct Router {
    topic_prefix: String,
    json: bool,
    sanitizer: Box<dyn TopicSanitizer>,
}

impl Router {
    /// Create a router using the default MQTT topic sanitizer.
    pub fn new(config: &RoutingConfig) -> Self {
        Self::with_sanitizer(config, Box::new(MqttTopicSanitizer))
    }

    pub fn with_sanitizer(config: &RoutingConfig, sanitizer: Box<dyn TopicSanitizer>) -> Self {
        Self {
            topic_prefix: config.topic_prefix.clone(),
            json: config.json,
            sanitizer,
        }
    }

    /// Decide topic and payload.
    ///
    /// Structured mode publishes a JSON envelope on the bare prefix. Raw mode
    /// publishes the plain-text body on `prefix + sanitize(subject)`.
    pub fn route(
        &self,
        headers: &DecodedHeaders,
        envelope: &Envelope,
        body: &DecodeResult,
    ) -> Result<RoutingDecision> {
        let decision = if self.json {
            let payload = serde_json::to_vec(&MailJson {
                subject: &headers.subject,
                sender: &envelope.sender,
                recipients: &envelope.recipients,
                text: &body.text,
                html: &body.html,
            })?;
            RoutingDecision {
                topic: self.topic_prefix.clone(),
                payload,
                encoding: PayloadEncoding::StructuredJson,
            }
        } else {
            let level = self.sanitizer.sanitize(&headers.subject);
            RoutingDecision {
                topic: format!("{}{}", self.topic_prefix, level),
                payload: body.text.clone().into_bytes(),
                encoding: PayloadEncoding::RawText,
            }
        };

        debug!(
            topic = %decision.topic,
            encoding = ?decision.encoding,
            size = decision.payload.len(),
            "Routing decision"
        );
        Ok(decision)
    }
}
