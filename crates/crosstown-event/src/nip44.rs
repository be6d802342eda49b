// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! NIP-44 v2 authenticated encryption for addressed event payloads.
//!
//! # Construction
//!
//! ```text
//! conversation key = HKDF-extract(salt = "nip44-v2", ikm = ECDH(sk, pk).x)
//! per message:      nonce ← CSPRNG (32 bytes)
//!                   key ‖ iv ‖ mac-key = HKDF-expand(conversation key, nonce, 76)
//!                   body = ChaCha20(key, iv, pad(plaintext))
//!                   tag  = HMAC-SHA256(mac-key, nonce ‖ body)
//! payload = base64(0x02 ‖ nonce ‖ body ‖ tag)
//! ```
//!
//! The conversation key is symmetric: `ECDH(a, B).x == ECDH(b, A).x`, so both
//! directions of a conversation decrypt with the same derivation. Plaintext
//! lengths are hidden up to a power-of-two bucket by the padding scheme.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use k256::{ecdh::diffie_hellman, PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::EventError;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 2;
const SALT: &[u8] = b"nip44-v2";
const MIN_PLAINTEXT: usize = 1;
const MAX_PLAINTEXT: usize = 65535;

/// Encrypt `plaintext` from the holder of `secret` to `peer_pubkey_hex`.
pub fn encrypt(secret: &[u8; 32], peer_pubkey_hex: &str, plaintext: &str) -> Result<String, EventError> {
    let conv_key = conversation_key(secret, peer_pubkey_hex)?;
    let mut nonce = [0u8; 32];
    OsRng.fill_bytes(&mut nonce);
    encrypt_with_nonce(&conv_key, &nonce, plaintext)
}

/// Decrypt a NIP-44 payload addressed to the holder of `secret` from
/// `peer_pubkey_hex`.
pub fn decrypt(secret: &[u8; 32], peer_pubkey_hex: &str, payload: &str) -> Result<String, EventError> {
    if payload.starts_with('#') {
        return Err(EventError::Crypto("unsupported payload version".into()));
    }
    let data = BASE64
        .decode(payload)
        .map_err(|e| EventError::Crypto(format!("payload base64: {e}")))?;
    // version + nonce + minimum body (2-byte length prefix, 32-byte bucket) + tag
    if data.len() < 1 + 32 + 34 + 32 {
        return Err(EventError::Crypto("payload too short".into()));
    }
    if data[0] != VERSION {
        return Err(EventError::Crypto("unsupported payload version".into()));
    }

    let nonce: [u8; 32] = data[1..33]
        .try_into()
        .map_err(|_| EventError::Crypto("nonce slice".into()))?;
    let (body, tag) = data[33..].split_at(data.len() - 33 - 32);

    let conv_key = conversation_key(secret, peer_pubkey_hex)?;
    let (key, iv, mac_key) = message_keys(&conv_key, &nonce)?;

    let mut mac = HmacSha256::new_from_slice(&mac_key)
        .map_err(|e| EventError::Crypto(format!("hmac key: {e}")))?;
    mac.update(&nonce);
    mac.update(body);
    mac.verify_slice(tag)
        .map_err(|_| EventError::Crypto("authentication tag mismatch".into()))?;

    let mut buf = body.to_vec();
    let mut cipher = ChaCha20::new(Key::from_slice(&key), Nonce::from_slice(&iv));
    cipher.apply_keystream(&mut buf);
    unpad(&buf)
}

fn encrypt_with_nonce(conv_key: &[u8; 32], nonce: &[u8; 32], plaintext: &str) -> Result<String, EventError> {
    let (key, iv, mac_key) = message_keys(conv_key, nonce)?;

    let mut buf = pad(plaintext)?;
    let mut cipher = ChaCha20::new(Key::from_slice(&key), Nonce::from_slice(&iv));
    cipher.apply_keystream(&mut buf);

    let mut mac = HmacSha256::new_from_slice(&mac_key)
        .map_err(|e| EventError::Crypto(format!("hmac key: {e}")))?;
    mac.update(nonce);
    mac.update(&buf);
    let tag = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + 32 + buf.len() + 32);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buf);
    payload.extend_from_slice(&tag);
    Ok(BASE64.encode(payload))
}

/// Derive the per-conversation key from our secret and the peer's x-only
/// public key.
fn conversation_key(secret: &[u8; 32], peer_pubkey_hex: &str) -> Result<[u8; 32], EventError> {
    let x = hex::decode(peer_pubkey_hex)
        .map_err(|e| EventError::InvalidKey(format!("peer pubkey hex: {e}")))?;
    if x.len() != 32 {
        return Err(EventError::InvalidKey("peer pubkey must be 32 bytes".into()));
    }
    // Lift the x-only key to a point; BIP-340 keys imply an even y, and the
    // shared x-coordinate is invariant under point negation anyway.
    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(&x);
    let peer = PublicKey::from_sec1_bytes(&sec1)
        .map_err(|e| EventError::InvalidKey(format!("peer pubkey: {e}")))?;
    let own = SecretKey::from_slice(secret)
        .map_err(|e| EventError::InvalidKey(format!("secret key: {e}")))?;

    let shared = diffie_hellman(own.to_nonzero_scalar(), peer.as_affine());
    let (prk, _) = Hkdf::<Sha256>::extract(Some(SALT), shared.raw_secret_bytes().as_slice());
    Ok(prk.into())
}

fn message_keys(conv_key: &[u8; 32], nonce: &[u8; 32]) -> Result<([u8; 32], [u8; 12], [u8; 32]), EventError> {
    let hk = Hkdf::<Sha256>::from_prk(conv_key)
        .map_err(|e| EventError::Crypto(format!("hkdf prk: {e}")))?;
    let mut okm = [0u8; 76];
    hk.expand(nonce, &mut okm)
        .map_err(|e| EventError::Crypto(format!("hkdf expand: {e}")))?;

    let mut key = [0u8; 32];
    let mut iv = [0u8; 12];
    let mut mac_key = [0u8; 32];
    key.copy_from_slice(&okm[0..32]);
    iv.copy_from_slice(&okm[32..44]);
    mac_key.copy_from_slice(&okm[44..76]);
    Ok((key, iv, mac_key))
}

/// Padded length: 32-byte buckets below 256, then 1/8th of the next power of
/// two above that.
fn calc_padded_len(unpadded: usize) -> usize {
    if unpadded <= 32 {
        return 32;
    }
    let next_power = 1usize << (usize::BITS - (unpadded - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((unpadded - 1) / chunk + 1)
}

fn pad(plaintext: &str) -> Result<Vec<u8>, EventError> {
    let bytes = plaintext.as_bytes();
    if bytes.len() < MIN_PLAINTEXT || bytes.len() > MAX_PLAINTEXT {
        return Err(EventError::Crypto(format!(
            "plaintext length {} out of range",
            bytes.len()
        )));
    }
    let mut out = vec![0u8; 2 + calc_padded_len(bytes.len())];
    out[0..2].copy_from_slice(&(bytes.len() as u16).to_be_bytes());
    out[2..2 + bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn unpad(padded: &[u8]) -> Result<String, EventError> {
    if padded.len() < 2 {
        return Err(EventError::Crypto("padded body too short".into()));
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT || padded.len() != 2 + calc_padded_len(len) {
        return Err(EventError::Crypto("invalid padding".into()));
    }
    let body = padded[2..2 + len].to_vec();
    String::from_utf8(body).map_err(|e| EventError::Crypto(format!("plaintext utf-8: {e}")))
}

// ── Unit tests ────────────────────────────────────────────────────────────────
