//! Message-bus publishing.

pub mod mqtt;

use crate::error::Result;

/// Something that can deliver a payload to a topic.
///
/// Implementations are shared across session threads.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}
