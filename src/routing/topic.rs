//! MQTT topic sanitizing for subject-derived topic levels.

/// Turns arbitrary text into a value legal in the bus's topic grammar.
pub trait TopicSanitizer: Send + Sync {
    fn sanitize(&self, subject: &str) -> String;
}

/// Fallback topic level for subjects with nothing usable in them.
pub const EMPTY_SUBJECT_LEVEL: &str = "no_subject";

/// Produces a single MQTT topic level.
///
/// Wildcards (`+`, `#`), the level separator `/`, control characters, and
/// whitespace become `_`; runs of `_` collapse and are trimmed from both ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttTopicSanitizer;

impl TopicSanitizer for MqttTopicSanitizer {
    fn sanitize(&self, subject: &str) -> String {
        let mut out = String::with_capacity(subject.len());
        for ch in subject.chars() {
            let ch = match ch {
                '+' | '#' | '/' => '_',
                c if c.is_control() || c.is_whitespace() => '_',
                c => c,
            };
            if ch == '_' && out.ends_with('_') {
                continue;
            }
            out.push(ch);
        }

        let trimmed = out.trim_matches('_');
        if trimmed.is_empty() {
            EMPTY_SUBJECT_LEVEL.to_string()
        } else {
            trimmed.to_string()
        }
    }
}
