//! Request fingerprinting.
//!
//! A fingerprint is the identity of a request for caching and
//! coalescing: two requests with the same fingerprint share one
//! computation. It covers the template id, the canonically ordered
//! parameter mapping and the ids of any retrieved context — caller
//! identity, priority and deadline deliberately stay out, they change
//! who is asking, not what is asked.
//!
//! SHA-256 keeps the hash stable across process restarts, so the same
//! key scheme works for a future shared cache backend without change.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Stable content hash identifying semantically identical requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    /// Short hex prefix, enough to correlate log lines.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Compute the fingerprint for a request.
///
/// Pure function: no clocks, no addresses, no per-process state. The
/// `BTreeMap` iterates keys in sorted order, which canonicalizes the
/// parameter mapping. Every field is length-prefixed so boundaries
/// between adjacent values stay unambiguous.
pub fn fingerprint(
    template_id: &str,
    parameters: &BTreeMap<String, String>,
    context_ids: &[String],
) -> Fingerprint {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, template_id);
    hasher.update((parameters.len() as u64).to_le_bytes());
    for (key, value) in parameters {
        update_field(&mut hasher, key);
        update_field(&mut hasher, value);
    }
    hasher.update((context_ids.len() as u64).to_le_bytes());
    for id in context_ids {
        update_field(&mut hasher, id);
    }
    Fingerprint(hasher.finalize().into())
}

fn update_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}
