// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! TOON — a deterministic, self-describing text encoding of a signed event,
//! used to embed events in ILP packet payloads.
//!
//! # Wire format
//!
//! One field per line, `key:value`:
//!
//! ```text
//! id:"e0b94a…"
//! pubkey:"91cf4d…"
//! created_at:1712345678
//! kind:10032
//! tags[0]:["p","91cf4d…"]
//! content:"{\"ilpAddress\":\"g.crosstown.node\"}"
//! sig:"30cd72…"
//! ```
//!
//! Strings are JSON-quoted with every non-ASCII scalar and control character
//! escaped as `\uXXXX` (surrogate pairs above the BMP), so the encoded form
//! is pure printable ASCII. Numbers are decimal. `tags[i]` entries expand one
//! tag per line in index order. The decoder accepts lines in any order.
//!
//! The encoding is byte-exact for `content` — NIP-44 ciphertext passes
//! through unchanged, and signatures still verify after a round trip.

use std::collections::HashMap;

use thiserror::Error;

use crosstown_event::Event;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("TOON decode error: {0}")]
pub struct ToonDecodeError(pub String);

/// Codec injection seam: anything that can carry a signed event through a
/// binary transport.
pub trait EventCodec: Send + Sync {
    fn encode(&self, event: &Event) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<Event, ToonDecodeError>;
}

/// The TOON implementation of [`EventCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ToonCodec;

impl EventCodec for ToonCodec {
    fn encode(&self, event: &Event) -> Vec<u8> {
        encode(event)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Event, ToonDecodeError> {
        decode(bytes)
    }
}

/// Encode an event. Field order is fixed so equal events encode to equal
/// bytes.
pub fn encode(event: &Event) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("id:");
    quote_into(&event.id, &mut out);
    out.push_str("\npubkey:");
    quote_into(&event.pubkey, &mut out);
    out.push_str("\ncreated_at:");
    out.push_str(&event.created_at.to_string());
    out.push_str("\nkind:");
    out.push_str(&event.kind.to_string());
    out.push('\n');
    for (i, tag) in event.tags.iter().enumerate() {
        out.push_str(&format!("tags[{i}]:["));
        for (j, value) in tag.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            quote_into(value, &mut out);
        }
        out.push_str("]\n");
    }
    out.push_str("content:");
    quote_into(&event.content, &mut out);
    out.push_str("\nsig:");
    quote_into(&event.sig, &mut out);
    out.push('\n');
    out.into_bytes()
}

/// Parse and validate an encoded event.
pub fn decode(bytes: &[u8]) -> Result<Event, ToonDecodeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ToonDecodeError(format!("not valid UTF-8: {e}")))?;

    let mut fields: HashMap<&str, &str> = HashMap::new();
    let mut tags: Vec<(usize, Vec<String>)> = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ToonDecodeError(format!("missing separator in line {line:?}")))?;
        if let Some(index) = tag_index(key)? {
            let tag: Vec<String> = serde_json::from_str(value)
                .map_err(|e| ToonDecodeError(format!("tags[{index}]: {e}")))?;
            tags.push((index, tag));
        } else if fields.insert(key, value).is_some() {
            return Err(ToonDecodeError(format!("duplicate field {key:?}")));
        }
    }

    // Tag entries reassemble in index order and must be gapless from zero.
    tags.sort_by_key(|(i, _)| *i);
    for (position, (index, _)) in tags.iter().enumerate() {
        if *index != position {
            return Err(ToonDecodeError(format!(
                "tag indices must be contiguous from 0, found tags[{index}] at position {position}"
            )));
        }
    }
    let tags: Vec<Vec<String>> = tags.into_iter().map(|(_, t)| t).collect();

    let id = string_field(&fields, "id")?;
    let pubkey = string_field(&fields, "pubkey")?;
    let content = string_field(&fields, "content")?;
    let sig = string_field(&fields, "sig")?;
    let created_at: i64 = int_field(&fields, "created_at")?;
    let kind: u32 = int_field(&fields, "kind")?;

    require_hex(&id, 64, "id")?;
    require_hex(&pubkey, 64, "pubkey")?;
    require_hex(&sig, 128, "sig")?;

    Ok(Event {
        id,
        pubkey,
        created_at,
        kind,
        tags,
        content,
        sig,
    })
}

/// JSON-style quoting, escaping everything outside printable ASCII.
fn quote_into(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (' '..='~').contains(&c) => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}

fn tag_index(key: &str) -> Result<Option<usize>, ToonDecodeError> {
    let Some(rest) = key.strip_prefix("tags[") else {
        return Ok(None);
    };
    let Some(digits) = rest.strip_suffix(']') else {
        return Err(ToonDecodeError(format!("malformed tag key {key:?}")));
    };
    let index = digits
        .parse::<usize>()
        .map_err(|e| ToonDecodeError(format!("tag index in {key:?}: {e}")))?;
    Ok(Some(index))
}

fn string_field(fields: &HashMap<&str, &str>, name: &str) -> Result<String, ToonDecodeError> {
    let raw = fields
        .get(name)
        .ok_or_else(|| ToonDecodeError(format!("missing field {name:?}")))?;
    serde_json::from_str(raw).map_err(|e| ToonDecodeError(format!("{name}: {e}")))
}

fn int_field<T: std::str::FromStr>(
    fields: &HashMap<&str, &str>,
    name: &str,
) -> Result<T, ToonDecodeError>
where
    T::Err: std::fmt::Display,
{
    let raw = fields
        .get(name)
        .ok_or_else(|| ToonDecodeError(format!("missing field {name:?}")))?;
    raw.parse()
        .map_err(|e| ToonDecodeError(format!("{name}: {e}")))
}

fn require_hex(value: &str, len: usize, name: &str) -> Result<(), ToonDecodeError> {
    let ok = value.len() == len
        && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if ok {
        Ok(())
    } else {
        Err(ToonDecodeError(format!("{name} must be {len} lowercase hex chars")))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
