// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Settlement-chain negotiation and channel establishment.
//!
//! The negotiation functions are pure: chain selection intersects the two
//! sides' supported chains **in requester order**, then lets requester
//! preference win over responder preference. Channel establishment wraps the
//! external [`ChannelClient`] with a bounded status-polling loop.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

use crosstown_connector::{peer_id_for, ChannelClient, ChannelStatus, OpenChannelRequest};
use crosstown_event::{SettlementInfo, SpspRequest};

use crate::error::SpspError;

/// Tunables for the channel-opening sub-protocol.
#[derive(Debug, Clone)]
pub struct SettlementNegotiationConfig {
    /// Decimal string deposit committed when opening a channel.
    pub initial_deposit: String,
    /// Challenge window in seconds written into the channel.
    pub settlement_timeout: u64,
    /// How long to wait for a channel to reach `open`.
    pub channel_open_timeout: Duration,
    /// Delay between channel-state polls.
    pub poll_interval: Duration,
}

impl Default for SettlementNegotiationConfig {
    fn default() -> Self {
        Self {
            initial_deposit: "0".to_string(),
            settlement_timeout: 86_400,
            channel_open_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of a successful negotiation: everything the responder reports back
/// in the SPSP response, and the orchestrator records per peer.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedSettlement {
    pub chain: String,
    /// Our own settlement address on `chain`, if configured.
    pub settlement_address: Option<String>,
    pub token_address: Option<String>,
    pub token_network_address: Option<String>,
    pub channel_id: String,
    pub settlement_timeout: u64,
}

/// Intersect chains preserving requester order, then prefer the first member
/// the requester has a token preference for, then the responder, then the
/// plain first member.
pub fn negotiate_chain(
    requester_chains: &[String],
    responder_chains: &[String],
    requester_prefs: Option<&BTreeMap<String, String>>,
    responder_prefs: Option<&BTreeMap<String, String>>,
) -> Option<String> {
    let intersection: Vec<&String> = requester_chains
        .iter()
        .filter(|chain| responder_chains.contains(chain))
        .collect();
    if intersection.is_empty() {
        return None;
    }

    if let Some(prefs) = requester_prefs {
        if let Some(chain) = intersection.iter().find(|c| prefs.contains_key(**c)) {
            return Some((*chain).clone());
        }
    }
    if let Some(prefs) = responder_prefs {
        if let Some(chain) = intersection.iter().find(|c| prefs.contains_key(**c)) {
            return Some((*chain).clone());
        }
    }
    Some(intersection[0].clone())
}

/// Token for `chain`: requester preference wins, else responder, else none.
pub fn resolve_token(
    chain: &str,
    requester_prefs: Option<&BTreeMap<String, String>>,
    responder_prefs: Option<&BTreeMap<String, String>>,
) -> Option<String> {
    requester_prefs
        .and_then(|p| p.get(chain))
        .or_else(|| responder_prefs.and_then(|p| p.get(chain)))
        .cloned()
}

/// Run the full settlement sub-protocol for an inbound SPSP request.
///
/// Returns `Ok(None)` when no settlement is possible (no chain intersection,
/// or the requester published no address on the negotiated chain). Channel
/// client failures propagate — the caller decides whether to degrade.
pub async fn negotiate_and_open(
    request: &SpspRequest,
    requester_pubkey: &str,
    own: &SettlementInfo,
    config: &SettlementNegotiationConfig,
    channels: &dyn ChannelClient,
) -> Result<Option<NegotiatedSettlement>, SpspError> {
    let Some(requester_chains) = request.supported_chains.as_deref() else {
        return Ok(None);
    };

    let Some(chain) = negotiate_chain(
        requester_chains,
        &own.supported_chains,
        request.preferred_tokens.as_ref(),
        Some(&own.preferred_tokens),
    ) else {
        debug!(%requester_pubkey, "no settlement chain intersection");
        return Ok(None);
    };

    let Some(peer_address) = request
        .settlement_addresses
        .as_ref()
        .and_then(|m| m.get(&chain))
        .cloned()
    else {
        debug!(%requester_pubkey, %chain, "requester has no settlement address on negotiated chain");
        return Ok(None);
    };

    let token = resolve_token(&chain, request.preferred_tokens.as_ref(), Some(&own.preferred_tokens));

    let open = channels
        .open_channel(OpenChannelRequest {
            peer_id: peer_id_for(requester_pubkey),
            chain: chain.clone(),
            token: token.clone(),
            token_network: own.token_networks.get(&chain).cloned(),
            peer_address,
            initial_deposit: config.initial_deposit.clone(),
            settlement_timeout: config.settlement_timeout,
        })
        .await
        .map_err(|e| SpspError::ChannelOpenFailed(e.to_string()))?;

    if open.status != ChannelStatus::Open {
        await_channel_open(channels, &open.channel_id, config).await?;
    }
    info!(%chain, channel = %open.channel_id, "payment channel open");

    Ok(Some(NegotiatedSettlement {
        settlement_address: own.settlement_addresses.get(&chain).cloned(),
        token_address: token,
        token_network_address: own.token_networks.get(&chain).cloned(),
        channel_id: open.channel_id,
        settlement_timeout: config.settlement_timeout,
        chain,
    }))
}

/// Poll channel state until `open` or the configured deadline.
async fn await_channel_open(
    channels: &dyn ChannelClient,
    channel_id: &str,
    config: &SettlementNegotiationConfig,
) -> Result<(), SpspError> {
    let deadline = tokio::time::Instant::now() + config.channel_open_timeout;
    loop {
        // The deadline is checked between polls so cancellation is prompt.
        if tokio::time::Instant::now() >= deadline {
            return Err(SpspError::ChannelOpenTimeout);
        }
        tokio::time::sleep(config.poll_interval).await;
        let state = channels
            .channel_state(channel_id)
            .await
            .map_err(|e| SpspError::ChannelOpenFailed(e.to_string()))?;
        if state.status == ChannelStatus::Open {
            return Ok(());
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
