//! Integration tests for header normalization, MIME decoding, and routing.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use smtp2mqtt::config::RoutingConfig;
use smtp2mqtt::error::BridgeError;
use smtp2mqtt::forward::route_envelope;
use smtp2mqtt::model::mail::Envelope;
use smtp2mqtt::parser::message::parse_mail;
use smtp2mqtt::routing::Router;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn load(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

// ─── End-to-end scenarios ───────────────────────────────────────────

#[test]
fn test_scenario_mixed_plain_part() {
    let parsed = parse_mail(&load("scenario1_mixed.eml")).unwrap();
    assert!(parsed.body.is_multipart);
    assert_eq!(parsed.body.text, "Hello");
    assert_eq!(parsed.body.html, "");
    assert_eq!(parsed.headers.subject, "Motion detected");
    assert_eq!(parsed.headers.from_display, "Camera <camera@example.com>");
}

#[test]
fn test_scenario_alternative_base64_and_quoted_printable() {
    let parsed = parse_mail(&load("scenario2_alternative.eml")).unwrap();
    assert_eq!(parsed.body.text, "Hi");
    assert_eq!(parsed.body.html, "<b>Hi</b>");
    assert_eq!(parsed.content_type.media_type, "multipart/alternative");
}

#[test]
fn test_scenario_encoded_subject() {
    let parsed = parse_mail(&load("encoded_subject.eml")).unwrap();
    assert_eq!(parsed.headers.subject, "Hello");
    assert_eq!(parsed.headers.from_display, "Jörg <joerg@example.com>");
    assert_eq!(parsed.body.text, "Body");
}

// ─── Decoder properties ─────────────────────────────────────────────

#[test]
fn test_non_multipart_is_not_body_decoded() {
    let parsed = parse_mail(&load("non_multipart.eml")).unwrap();
    assert!(!parsed.body.is_multipart);
    assert_eq!(parsed.body.text, "");
    assert_eq!(parsed.body.html, "");
}

#[test]
fn test_nested_multipart_replaces_earlier_siblings() {
    let parsed = parse_mail(&load("nested.eml")).unwrap();
    assert_eq!(parsed.body.text, "Inner text");
    assert_eq!(parsed.body.html, "<p>Inner html</p>");
    assert_eq!(parsed.headers.subject, "Grüße aus der Halle");
}

#[test]
fn test_invalid_base64_part_is_empty_and_traversal_continues() {
    let parsed = parse_mail(&load("invalid_base64.eml")).unwrap();
    assert_eq!(parsed.body.text, "");
    assert_eq!(parsed.body.html, "<i>still here</i>");
}

#[test]
fn test_slot_assignment_independent_of_order() {
    let html_first = parse_mail(&load("html_first.eml")).unwrap();
    let text_first = parse_mail(&load("scenario2_alternative.eml")).unwrap();
    assert_eq!(html_first.body.text, text_first.body.text);
    assert_eq!(html_first.body.html, text_first.body.html);
}

#[test]
fn test_zero_parts_yields_empty_result() {
    let parsed = parse_mail(&load("zero_parts.eml")).unwrap();
    assert!(parsed.body.is_multipart);
    assert_eq!(parsed.body.text, "");
    assert_eq!(parsed.body.html, "");
}

#[test]
fn test_missing_content_type_is_fatal() {
    let err = parse_mail(&load("missing_content_type.eml")).unwrap_err();
    assert!(matches!(err, BridgeError::ContentType { .. }), "got {err:?}");
}

#[test]
fn test_base64_text_round_trips() {
    let samples = [
        "Hi",
        "Motion detected at 08:15 on camera 3",
        "Grüße, 温度 21°C",
        "line one\r\nline two\r\n",
    ];
    for sample in samples {
        let encoded = STANDARD.encode(sample);
        // Wrap at 76 columns like real mailers do
        let wrapped: Vec<&str> = encoded
            .as_bytes()
            .chunks(76)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();
        let message = format!(
            "Subject: rt\r\nContent-Type: multipart/mixed; boundary=rt\r\n\r\n\
             --rt\r\nContent-Type: text/plain; charset=utf-8\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{}\r\n--rt--\r\n",
            wrapped.join("\r\n")
        );

        let parsed = parse_mail(message.as_bytes()).unwrap();
        assert_eq!(parsed.body.text, sample);
        assert_eq!(STANDARD.encode(&parsed.body.text), encoded);
    }
}

// ─── Routing ────────────────────────────────────────────────────────

fn envelope(name: &str) -> Envelope {
    Envelope {
        sender: "camera@example.com".to_string(),
        recipients: vec!["alerts@example.com".to_string()],
        data: load(name),
    }
}

#[test]
fn test_route_raw_mode() {
    let router = Router::new(&RoutingConfig {
        topic_prefix: "smtp/".to_string(),
        json: false,
    });
    let decision = route_envelope(&router, &envelope("nested.eml")).unwrap();
    assert_eq!(decision.topic, "smtp/Grüße_aus_der_Halle");
    assert_eq!(decision.payload, b"Inner text");
}

#[test]
fn test_route_json_mode() {
    let router = Router::new(&RoutingConfig {
        topic_prefix: "smtp/mail".to_string(),
        json: true,
    });
    let decision = route_envelope(&router, &envelope("scenario2_alternative.eml")).unwrap();
    assert_eq!(decision.topic, "smtp/mail");

    let value: serde_json::Value = serde_json::from_slice(&decision.payload).unwrap();
    assert_eq!(value["subject"], "Greeting");
    assert_eq!(value["sender"], "camera@example.com");
    assert_eq!(value["recipients"][0], "alerts@example.com");
    assert_eq!(value["text"], "Hi");
    assert_eq!(value["html"], "<b>Hi</b>");
}
