//! Per-message pipeline: parse, decode, route, publish.

use std::sync::Arc;

use tracing::{debug, info};

use crate::bus::Publisher;
use crate::error::Result;
use crate::model::mail::Envelope;
use crate::parser::message::parse_mail;
use crate::routing::{Router, RoutingDecision};

/// Turns accepted envelopes into bus publications.
///
/// Holds no per-message state, so one instance serves every session thread.
pub struct Forwarder {
    router: Router,
    publisher: Arc<dyn Publisher>,
}

impl Forwarder {
    pub fn new(router: Router, publisher: Arc<dyn Publisher>) -> Self {
        Self { router, publisher }
    }

    /// Decode one envelope and publish it exactly once.
    ///
    /// Errors mean the message was dropped; the caller logs them. Nothing is
    /// retried.
    pub fn forward(&self, envelope: &Envelope) -> Result<RoutingDecision> {
        debug!(
            sender = %envelope.sender,
            recipients = ?envelope.recipients,
            size = envelope.data.len(),
            "Forwarding message"
        );

        let decision = route_envelope(&self.router, envelope)?;

        info!(
            sender = %envelope.sender,
            topic = %decision.topic,
            "E-mail received, publishing"
        );
        self.publisher.publish(&decision.topic, &decision.payload)?;
        Ok(decision)
    }
}

/// Parse and route an envelope without publishing it.
pub fn route_envelope(router: &Router, envelope: &Envelope) -> Result<RoutingDecision> {
    let parsed = parse_mail(&envelope.data)?;
    debug!(
        subject = %parsed.headers.subject,
        text = %parsed.body.text,
        html = %parsed.body.html,
        multipart = parsed.body.is_multipart,
        "Parsed message"
    );
    router.route(&parsed.headers, envelope, &parsed.body)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::RoutingConfig;
    use crate::error::BridgeError;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
            if self.fail {
                return Err(BridgeError::Publish {
                    topic: topic.to_string(),
                    reason: "broker unavailable".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    fn envelope(data: &str) -> Envelope {
        Envelope {
            sender: "camera@example.com".to_string(),
            recipients: vec!["alerts@example.com".to_string()],
            data: data.as_bytes().to_vec(),
        }
    }

    const MULTIPART: &str = "Subject: Motion detected\r\n\
        Content-Type: multipart/mixed; boundary=B1\r\n\r\n\
        --B1\r\nContent-Type: text/plain\r\n\r\nFront door\r\n--B1--\r\n";

    #[test]
    fn test_forward_publishes_once() {
        let publisher = Arc::new(RecordingPublisher::default());
        let forwarder = Forwarder::new(
            Router::new(&RoutingConfig {
                topic_prefix: "smtp/".to_string(),
                json: false,
            }),
            publisher.clone(),
        );

        let decision = forwarder.forward(&envelope(MULTIPART)).unwrap();
        assert_eq!(decision.topic, "smtp/Motion_detected");

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "smtp/Motion_detected");
        assert_eq!(published[0].1, b"Front door");
    }

    #[test]
    fn test_forward_drops_message_without_content_type() {
        let publisher = Arc::new(RecordingPublisher::default());
        let forwarder = Forwarder::new(Router::new(&RoutingConfig::default()), publisher.clone());

        let result = forwarder.forward(&envelope("Subject: x\r\n\r\nbody\r\n"));
        assert!(matches!(result, Err(BridgeError::ContentType { .. })));
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[test]
    fn test_forward_reports_publish_failure() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let forwarder = Forwarder::new(Router::new(&RoutingConfig::default()), publisher);
        assert!(matches!(
            forwarder.forward(&envelope(MULTIPART)),
            Err(BridgeError::Publish { .. })
        ));
    }

    #[test]
    fn test_route_envelope_non_multipart_publishes_empty_text() {
        let router = Router::new(&RoutingConfig::default());
        let decision = route_envelope(
            &router,
            &envelope("Subject: Ping\r\nContent-Type: text/plain\r\n\r\nignored\r\n"),
        )
        .unwrap();
        assert_eq!(decision.topic, "Ping");
        assert!(decision.payload.is_empty());
    }
}
