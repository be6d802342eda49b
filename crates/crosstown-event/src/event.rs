// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The signed event — the canonical unit exchanged on the relay layer.
//!
//! # Identity and signature
//!
//! Per NIP-01, the event id is the SHA-256 of the canonical JSON array
//! `[0, pubkey, created_at, kind, tags, content]`, and the signature is a
//! BIP-340 Schnorr signature over those 32 id bytes. Both are lowercase hex
//! on the wire.

use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::EventError;
use crate::keys::{is_valid_pubkey, Keys};

/// Peer descriptor events. Replaceable; empty content is a tombstone.
pub const KIND_PEER_INFO: u32 = 10032;
/// Encrypted SPSP request events. Ephemeral.
pub const KIND_SPSP_REQUEST: u32 = 23194;
/// Encrypted SPSP response events. Ephemeral.
pub const KIND_SPSP_RESPONSE: u32 = 23195;

/// A signed, kind-tagged relay event (NIP-01 JSON shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Compute the canonical event id over the signable fields.
    pub fn compute_id(
        pubkey: &str,
        created_at: i64,
        kind: u32,
        tags: &[Vec<String>],
        content: &str,
    ) -> String {
        let canonical = json!([0, pubkey, created_at, kind, tags, content]);
        // Canonical serialization: serde_json escapes quotes, backslashes and
        // control characters and nothing else, which is exactly the NIP-01 rule.
        let serialized = canonical.to_string();
        hex::encode(Sha256::digest(serialized.as_bytes()))
    }

    /// Verify structural validity, id hash, and Schnorr signature.
    pub fn verify(&self) -> Result<(), EventError> {
        if !is_valid_pubkey(&self.pubkey) {
            return Err(EventError::InvalidEvent("malformed pubkey".into()));
        }
        let expected = Self::compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        if expected != self.id {
            return Err(EventError::InvalidEvent("id does not match contents".into()));
        }

        let id_bytes = hex::decode(&self.id)
            .map_err(|e| EventError::InvalidEvent(format!("id hex: {e}")))?;
        let pubkey_bytes = hex::decode(&self.pubkey)
            .map_err(|e| EventError::InvalidEvent(format!("pubkey hex: {e}")))?;
        let sig_bytes = hex::decode(&self.sig)
            .map_err(|e| EventError::InvalidEvent(format!("sig hex: {e}")))?;

        let verifying = VerifyingKey::from_bytes(&pubkey_bytes)
            .map_err(|e| EventError::InvalidEvent(format!("pubkey: {e}")))?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|e| EventError::InvalidEvent(format!("sig: {e}")))?;
        verifying
            .verify_raw(&id_bytes, &signature)
            .map_err(|_| EventError::InvalidEvent("signature verification failed".into()))
    }

    /// First `["p", …]` tag value, if any — the addressee of a control event.
    pub fn first_p_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == "p")
            .map(|t| t[1].as_str())
    }

    /// Replacement ordering for descriptor events from one author: newer
    /// `created_at` wins, ties broken by the lexicographically larger id.
    pub fn supersedes(&self, other: &Event) -> bool {
        match self.created_at.cmp(&other.created_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.id > other.id,
        }
    }

    /// An empty-content peer-info event deregisters its author.
    pub fn is_tombstone(&self) -> bool {
        self.content.is_empty()
    }
}

/// Unsigned event under construction.
#[derive(Debug, Clone)]
pub struct EventDraft {
    kind: u32,
    tags: Vec<Vec<String>>,
    content: String,
    created_at: Option<i64>,
}

impl EventDraft {
    pub fn new(kind: u32, content: impl Into<String>) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            content: content.into(),
            created_at: None,
        }
    }

    /// Append a tag; insertion order is preserved through signing.
    pub fn tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    /// Tag the event with a recipient pubkey (`["p", pubkey]`).
    pub fn to_pubkey(self, pubkey: &str) -> Self {
        self.tag(vec!["p".to_string(), pubkey.to_string()])
    }

    /// Pin `created_at` instead of sampling the clock at signing time.
    pub fn created_at(mut self, unix_seconds: i64) -> Self {
        self.created_at = Some(unix_seconds);
        self
    }

    /// Hash and sign, producing the finished event.
    pub fn sign(self, keys: &Keys) -> Result<Event, EventError> {
        let created_at = self
            .created_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        let pubkey = keys.public_key().to_string();
        let id = Event::compute_id(&pubkey, created_at, self.kind, &self.tags, &self.content);
        let id_bytes = hex::decode(&id).map_err(|e| EventError::Crypto(format!("id hex: {e}")))?;

        let signing: SigningKey = keys.signing_key()?;
        let aux_rand: [u8; 32] = rand::random();
        let signature = signing
            .sign_raw(&id_bytes, &aux_rand)
            .map_err(|e| EventError::Crypto(format!("schnorr sign: {e}")))?;

        Ok(Event {
            id,
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(signature.to_bytes()),
        })
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(kind: u32, content: &str) -> Event {
        EventDraft::new(kind, content).sign(&Keys::generate()).unwrap()
    }

    #[test]
    fn signed_event_verifies() {
        let event = signed(KIND_PEER_INFO, "{}");
        event.verify().unwrap();
    }

    #[test]
    fn tampered_content_fails_verification() {
        let mut event = signed(KIND_PEER_INFO, "{}");
        event.content = "{\"x\":1}".into();
        assert!(event.verify().is_err());
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let mut event = signed(KIND_PEER_INFO, "{}");
        let flipped = if event.sig.starts_with('0') { "1" } else { "0" };
        event.sig.replace_range(0..1, flipped);
        assert!(event.verify().is_err());
    }

    #[test]
    fn tags_preserve_insertion_order() {
        let keys = Keys::generate();
        let event = EventDraft::new(1, "")
            .tag(vec!["p".into(), "aa".repeat(32)])
            .tag(vec!["e".into(), "bb".repeat(32)])
            .tag(vec!["p".into(), "cc".repeat(32)])
            .sign(&keys)
            .unwrap();
        assert_eq!(event.tags[0][0], "p");
        assert_eq!(event.tags[1][0], "e");
        assert_eq!(event.first_p_tag(), Some("aa".repeat(32).as_str()));
    }

    #[test]
    fn supersedes_orders_by_created_at_then_id() {
        let keys = Keys::generate();
        let older = EventDraft::new(KIND_PEER_INFO, "a")
            .created_at(1000)
            .sign(&keys)
            .unwrap();
        let newer = EventDraft::new(KIND_PEER_INFO, "b")
            .created_at(1001)
            .sign(&keys)
            .unwrap();
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));

        let mut tie_a = older.clone();
        let mut tie_b = older.clone();
        tie_a.id = "aa".repeat(32);
        tie_b.id = "bb".repeat(32);
        assert!(tie_b.supersedes(&tie_a));
        assert!(!tie_a.supersedes(&tie_b));
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let event = signed(KIND_SPSP_REQUEST, "payload");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        back.verify().unwrap();
    }
}
