//! Event grouping.

use crate::event::NormalizedEvent;
use sha2::{Digest, Sha256};

/// Produces the stable grouping key for an event.
///
/// Implementations must be deterministic: the same logical failure has to
/// map to the same string across processes and restarts, because the key
/// is what collapses repeats into one issue.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, event: &NormalizedEvent) -> String;
}

/// Default grouping rules.
///
/// Exceptions group by type and failure site, deliberately ignoring the
/// message text so differing interpolated values collapse into one issue.
/// CSP reports group by directive and blocked resource; plain messages
/// group by their text.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFingerprinter;

impl Fingerprinter for DefaultFingerprinter {
    fn fingerprint(&self, event: &NormalizedEvent) -> String {
        let parts: [&str; 3] = if let Some(exception) = &event.exception {
            let ty = exception
                .primary()
                .and_then(|value| value.ty.as_deref())
                .unwrap_or("");
            let anchor = event
                .culprit
                .as_deref()
                .or(event.location.as_deref())
                .unwrap_or("");
            ["exception", ty, anchor]
        } else if let Some(csp) = &event.csp {
            ["csp", &csp.effective_directive, &csp.blocked_uri]
        } else if let Some(message) = &event.logentry {
            ["message", message, ""]
        } else {
            ["message", &event.title, ""]
        };
        digest(&parts)
    }
}

/// Length-prefixed join, so part boundaries cannot collide.
fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
