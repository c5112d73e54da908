//! Peer admission by `ip:port` prefix.

use tracing::{info, warn};

/// Allow/deny prefixes checked against the remote `ip:port` string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerFilter {
    pub allow: Option<String>,
    pub deny: Option<String>,
}

impl PeerFilter {
    pub fn new(allow: Option<String>, deny: Option<String>) -> Self {
        // Empty prefixes would match everything
        Self {
            allow: allow.filter(|p| !p.is_empty()),
            deny: deny.filter(|p| !p.is_empty()),
        }
    }

    /// Whether `peer` may send mail. Logs the outcome.
    pub fn check(&self, peer: &str) -> bool {
        if let Some(allow) = &self.allow {
            if !peer.starts_with(allow.as_str()) {
                warn!(peer, allow = %allow, "Peer not in allow list, denied");
                return false;
            }
        }
        if let Some(deny) = &self.deny {
            if peer.starts_with(deny.as_str()) {
                warn!(peer, deny = %deny, "Peer in deny list, denied");
                return false;
            }
        }
        info!(peer, "Peer accepted");
        true
    }
}
