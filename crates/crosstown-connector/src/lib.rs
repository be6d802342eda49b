// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Capability interfaces to the external ILP connector.
//!
//! The core never links against a connector implementation. The composition
//! root injects these three capabilities:
//!
//! - [`PacketSender`] — send an ILP PREPARE and await FULFILL or REJECT.
//! - [`AdminClient`] — register and deregister connector peers.
//! - [`ChannelClient`] — open on-chain payment channels and poll their state.
//!
//! Tests implement them directly as in-memory doubles; no transport mocking
//! is ever needed.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ConnectorError {
    #[error("connector unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("admin request failed: {0}")]
    Admin(String),

    #[error("channel operation failed: {0}")]
    Channel(String),
}

/// Derive the connector account id for a relay pubkey:
/// `"nostr-"` + the first 16 hex characters.
pub fn peer_id_for(pubkey: &str) -> String {
    let prefix: String = pubkey.chars().take(16).collect();
    format!("nostr-{prefix}")
}

// ── Packets ───────────────────────────────────────────────────────────────────

/// An outgoing ILP PREPARE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPacket {
    /// ILP destination address.
    pub destination: String,
    /// Decimal string amount in the connector's base units.
    pub amount: String,
    /// Base64-encoded packet data.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Outcome of an ILP send: FULFILL (`accepted`) or REJECT (`code`/`message`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketReply {
    pub accepted: bool,
    /// Base64 fulfillment preimage, present on FULFILL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<String>,
    /// Base64 response payload, present when the fulfiller attached data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// ILP error code (e.g. `"F00"`, `"F06"`, `"T00"`), present on REJECT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PacketReply {
    pub fn fulfilled(fulfillment: impl Into<String>, data: Option<String>) -> Self {
        Self {
            accepted: true,
            fulfillment: Some(fulfillment.into()),
            data,
            code: None,
            message: None,
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            fulfillment: None,
            data: None,
            code: Some(code.into()),
            message: Some(message.into()),
        }
    }
}

/// Sends ILP packets through the local connector.
///
/// A `Err(_)` return is a transport-level failure (connector unreachable,
/// timeout); an explicit REJECT comes back as `Ok(reply)` with
/// `accepted == false`.
#[async_trait]
pub trait PacketSender: Send + Sync {
    async fn send(&self, packet: OutgoingPacket) -> Result<PacketReply, ConnectorError>;
}

// ── Peer administration ───────────────────────────────────────────────────────

/// A routing-table entry installed with a peer registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Settlement configuration merged into a peer registration after a
/// successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementDetails {
    /// The negotiated chain identifier, e.g. `"evm:base:8453"`.
    pub preference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// The peer's on-chain settlement address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_timeout: Option<u64>,
}

/// A connector peer registration. Idempotent by `id`: repeated calls
/// overwrite the stored registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRegistration {
    pub id: String,
    /// BTP endpoint URL of the peer.
    pub url: String,
    pub auth_token: String,
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementDetails>,
}

#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn add_peer(&self, peer: PeerRegistration) -> Result<(), ConnectorError>;
    async fn remove_peer(&self, peer_id: &str) -> Result<(), ConnectorError>;
}

// ── Payment channels ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Opening,
    Open,
    Closed,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenChannelRequest {
    pub peer_id: String,
    pub chain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_network: Option<String>,
    /// The peer's settlement address on `chain`.
    pub peer_address: String,
    /// Decimal string deposit committed at open.
    pub initial_deposit: String,
    /// Challenge window in seconds.
    pub settlement_timeout: u64,
}

/// Result of an `open_channel` call; the channel may still be `Opening`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOpen {
    pub channel_id: String,
    pub status: ChannelStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub channel_id: String,
    pub status: ChannelStatus,
    pub chain: String,
}

#[async_trait]
pub trait ChannelClient: Send + Sync {
    async fn open_channel(&self, request: OpenChannelRequest) -> Result<ChannelOpen, ConnectorError>;
    async fn channel_state(&self, channel_id: &str) -> Result<ChannelState, ConnectorError>;
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_uses_first_16_hex_chars() {
        let pubkey = "aaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbccccccccccccccccdddddddddddddddd";
        assert_eq!(peer_id_for(pubkey), "nostr-aaaaaaaaaaaaaaaa");
    }

    #[test]
    fn packet_reply_constructors() {
        let ok = PacketReply::fulfilled("cHJlaW1hZ2U=", None);
        assert!(ok.accepted);
        assert!(ok.code.is_none());

        let no = PacketReply::rejected("F06", "Insufficient amount");
        assert!(!no.accepted);
        assert_eq!(no.code.as_deref(), Some("F06"));
    }

    #[test]
    fn channel_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ChannelStatus::Opening).unwrap(), "\"opening\"");
        assert_eq!(serde_json::to_string(&ChannelStatus::Open).unwrap(), "\"open\"");
    }

    #[test]
    fn registration_wire_shape() {
        let reg = PeerRegistration {
            id: "nostr-aaaaaaaaaaaaaaaa".into(),
            url: "ws://peer:7768".into(),
            auth_token: String::new(),
            routes: vec![Route {
                prefix: "g.test.peer".into(),
                priority: None,
            }],
            settlement: Some(SettlementDetails {
                preference: "evm:base:8453".into(),
                channel_id: Some("0xCH".into()),
                address: Some("0xPEER".into()),
                token_address: None,
                token_network: None,
                settlement_timeout: Some(86400),
            }),
        };
        let json = serde_json::to_string(&reg).unwrap();
        assert!(json.contains("\"authToken\""));
        assert!(json.contains("\"channelId\""));
        assert!(json.contains("\"settlementTimeout\""));
    }
}
