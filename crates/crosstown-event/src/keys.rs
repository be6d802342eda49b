// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Agent identity — a secp256k1 Schnorr keypair (BIP-340).
//!
//! The public key is the x-only coordinate, hex-encoded to the 64-character
//! lowercase form used everywhere on the relay layer. The secret key never
//! appears in logs or `Debug` output.

use std::path::Path;

use k256::schnorr::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::EventError;

/// Returns true iff `s` is a well-formed relay-layer pubkey:
/// exactly 64 lowercase hexadecimal characters.
pub fn is_valid_pubkey(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// A Schnorr keypair with its derived x-only public key.
#[derive(Clone)]
pub struct Keys {
    secret: [u8; 32],
    pubkey: String,
}

impl Keys {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        loop {
            let mut secret = [0u8; 32];
            OsRng.fill_bytes(&mut secret);
            // Out-of-range scalars (zero / >= curve order) are rejected by
            // the curve library; draw again.
            if let Ok(keys) = Self::from_secret_bytes(&secret) {
                return keys;
            }
        }
    }

    /// Construct from a raw 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, EventError> {
        let signing = SigningKey::from_bytes(secret)
            .map_err(|e| EventError::InvalidKey(format!("secret key: {e}")))?;
        let pubkey = hex::encode(signing.verifying_key().to_bytes());
        Ok(Self {
            secret: *secret,
            pubkey,
        })
    }

    /// Construct from a 64-character hex secret.
    pub fn from_secret_hex(hex_secret: &str) -> Result<Self, EventError> {
        let bytes = hex::decode(hex_secret.trim())
            .map_err(|e| EventError::InvalidKey(format!("secret hex: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EventError::InvalidKey("secret must be 32 bytes".into()))?;
        Self::from_secret_bytes(&secret)
    }

    /// Load the secret from `path`, or generate one and persist it (0o600)
    /// when the file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, EventError> {
        if path.exists() {
            let hex_secret = std::fs::read_to_string(path)?;
            return Self::from_secret_hex(&hex_secret);
        }
        let keys = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, hex::encode(keys.secret))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(keys)
    }

    /// The x-only public key, 64 lowercase hex characters.
    pub fn public_key(&self) -> &str {
        &self.pubkey
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    pub(crate) fn signing_key(&self) -> Result<SigningKey, EventError> {
        SigningKey::from_bytes(&self.secret)
            .map_err(|e| EventError::InvalidKey(format!("secret key: {e}")))
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("pubkey", &self.pubkey)
            .finish_non_exhaustive()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pubkey_is_valid() {
        let keys = Keys::generate();
        assert!(is_valid_pubkey(keys.public_key()));
    }

    #[test]
    fn secret_round_trips_through_hex() {
        let keys = Keys::generate();
        let again = Keys::from_secret_hex(&hex::encode(keys.secret_bytes())).unwrap();
        assert_eq!(keys.public_key(), again.public_key());
    }

    #[test]
    fn pubkey_validation_rejects_bad_input() {
        assert!(!is_valid_pubkey(""));
        assert!(!is_valid_pubkey("abc"));
        assert!(!is_valid_pubkey(&"A".repeat(64))); // uppercase
        assert!(!is_valid_pubkey(&"g".repeat(64))); // non-hex
        assert!(is_valid_pubkey(&"a1".repeat(32)));
    }

    #[test]
    fn load_or_create_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let first = Keys::load_or_create(&path).unwrap();
        let second = Keys::load_or_create(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let keys = Keys::generate();
        let rendered = format!("{keys:?}");
        assert!(!rendered.contains(&hex::encode(keys.secret_bytes())));
    }
}
