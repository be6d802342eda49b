// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire payload schemas carried inside event `content`.
//!
//! Peer descriptors (kind 10032) are plain JSON — they are public routing
//! metadata. SPSP request/response payloads (kinds 23194/23195) are encrypted
//! with NIP-44 before they reach `content`. All payloads use camelCase keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;

/// Public routing metadata a node advertises (kind 10032 `content`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    pub ilp_address: String,
    pub btp_endpoint: String,
    pub asset_code: String,
    pub asset_scale: u8,
    /// Chain identifiers such as `"evm:base:8453"` or `"xrp:mainnet"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_chains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_addresses: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_tokens: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_networks: Option<BTreeMap<String, String>>,
}

impl PeerDescriptor {
    pub fn supports_chain(&self, chain: &str) -> bool {
        self.supported_chains
            .as_ref()
            .is_some_and(|chains| chains.iter().any(|c| c == chain))
    }

    pub fn settlement_address_for(&self, chain: &str) -> Option<&str> {
        self.settlement_addresses
            .as_ref()
            .and_then(|m| m.get(chain))
            .map(String::as_str)
    }

    pub fn parse(content: &str) -> Result<Self, EventError> {
        let descriptor: PeerDescriptor = serde_json::from_str(content)?;
        if descriptor.ilp_address.is_empty() {
            return Err(EventError::Payload("descriptor missing ilpAddress".into()));
        }
        Ok(descriptor)
    }
}

/// A node's own settlement capabilities, offered during SPSP exchanges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementInfo {
    pub supported_chains: Vec<String>,
    #[serde(default)]
    pub settlement_addresses: BTreeMap<String, String>,
    #[serde(default)]
    pub preferred_tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub token_networks: BTreeMap<String, String>,
}

/// Decrypted kind-23194 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpspRequest {
    pub request_id: Uuid,
    /// Unix seconds at request creation.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_chains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_addresses: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_tokens: Option<BTreeMap<String, String>>,
}

impl SpspRequest {
    /// Fresh request, optionally carrying the requester's settlement offer.
    pub fn new(settlement: Option<&SettlementInfo>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now().timestamp(),
            supported_chains: settlement.map(|s| s.supported_chains.clone()),
            settlement_addresses: settlement.map(|s| s.settlement_addresses.clone()),
            preferred_tokens: settlement.map(|s| s.preferred_tokens.clone()),
        }
    }
}

/// Decrypted kind-23195 payload. Settlement fields are present only when the
/// responder negotiated a chain and opened (or reused) a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpspResponse {
    pub request_id: Uuid,
    pub destination_account: String,
    /// Base64-encoded shared secret for the STREAM connection.
    pub shared_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiated_chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_network_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_timeout: Option<u64>,
}

impl SpspResponse {
    /// Response carrying only the basic SPSP parameters.
    pub fn basic(request_id: Uuid, destination_account: String, shared_secret: String) -> Self {
        Self {
            request_id,
            destination_account,
            shared_secret,
            negotiated_chain: None,
            settlement_address: None,
            token_address: None,
            token_network_address: None,
            channel_id: None,
            settlement_timeout: None,
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
