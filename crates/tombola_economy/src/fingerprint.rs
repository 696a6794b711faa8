//! # Message Fingerprints
//!
//! Passive currency accrual rejects repeats of recently rewarded messages.
//! Messages are normalized (trimmed, lowercased, whitespace collapsed) before
//! hashing so trivial edits of the same text still collide.
//!
//! The hash keys are fixed constants: fingerprints are persisted in participant
//! records and must match across restarts. This is a stable content hash, not a
//! secret. Fingerprints are only compared against the same participant's own
//! history, so a crafted collision can at most cost its author a reward.

use siphasher::sip::SipHasher13;
use std::hash::Hasher;

const FINGERPRINT_K0: u64 = 0x7462_6f6c_615f_6d73;
const FINGERPRINT_K1: u64 = 0x6766_7072_696e_7431;

/// What the ledger needs to know about a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageSample {
    /// Stable SipHash-1-3 of the normalized text.
    pub fingerprint: u64,
    /// Character count of the normalized text.
    pub length: usize,
}

impl MessageSample {
    /// Builds a sample from raw message text.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let normalized = normalize(text);
        let mut hasher = SipHasher13::new_with_keys(FINGERPRINT_K0, FINGERPRINT_K1);
        hasher.write(normalized.as_bytes());
        Self {
            fingerprint: hasher.finish(),
            length: normalized.chars().count(),
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
