// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Bootstrap orchestrator — the multi-phase state machine that joins the
//! network.
//!
//! ```text
//! discovering → registering → [handshaking → announcing]? → ready
//!                                                         ↘ failed
//! ```
//!
//! The handshaking and announcing phases run only when a `PacketSender` is
//! configured; a relay-publish-only node stops at registration and announces
//! its descriptor directly on each peer's relay instead.
//!
//! `bootstrap()` never returns an error: per-peer failures are logged,
//! reported as `*Failed` lifecycle events, and skipped, so one bad peer can
//! never stop the node from joining through the others.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crosstown_connector::{
    peer_id_for, AdminClient, OutgoingPacket, PacketSender, PeerRegistration, Route,
    SettlementDetails,
};
use crosstown_event::{
    build_peer_info, is_valid_pubkey, Keys, PeerDescriptor, SettlementInfo, KIND_PEER_INFO,
};
use crosstown_relay::{Filter, RelayClient};
use crosstown_spsp::{PeerSettlement, SpspClient, SpspError, SpspRequestOptions};
use crosstown_toon::EventCodec;

use crate::error::BootstrapError;
use crate::lifecycle::{LifecycleEvent, Phase};
use crate::sources::{parse_known_peers, KnownPeer, PeerSources};

/// Orchestrator wiring. `admin` and `sender` are optional capabilities; what
/// is absent simply disables the phases that need it.
pub struct BootstrapConfig {
    pub keys: Keys,
    /// Our own published descriptor (`ownIlpInfo`).
    pub own_descriptor: PeerDescriptor,
    /// Caller-pinned peer seeds, merged over the aggregated sources.
    pub known_peers: Vec<KnownPeer>,
    pub sources: PeerSources,
    /// Per-relay descriptor query timeout.
    pub query_timeout: Duration,
    /// Announce cost multiplier: `amount = base_price_per_byte × toon bytes`.
    pub base_price_per_byte: u64,
    /// Our settlement offer for handshakes.
    pub settlement: Option<SettlementInfo>,
    pub codec: Arc<dyn EventCodec>,
    pub admin: Option<Arc<dyn AdminClient>>,
    pub sender: Option<Arc<dyn PacketSender>>,
}

impl BootstrapConfig {
    pub fn new(keys: Keys, own_descriptor: PeerDescriptor) -> Self {
        Self {
            keys,
            own_descriptor,
            known_peers: Vec::new(),
            sources: PeerSources::new(),
            query_timeout: Duration::from_secs(5),
            base_price_per_byte: 10,
            settlement: None,
            codec: Arc::new(crosstown_toon::ToonCodec),
            admin: None,
            sender: None,
        }
    }
}

/// Per-peer bootstrap outcome.
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    pub peer: KnownPeer,
    pub descriptor: PeerDescriptor,
    /// Connector account id, `"nostr-" + pubkey[..16]`.
    pub peer_id: String,
    pub channel_id: Option<String>,
    pub negotiated_chain: Option<String>,
    /// The peer's settlement address on the negotiated chain.
    pub settlement_address: Option<String>,
}

pub struct Bootstrapper {
    config: BootstrapConfig,
    phase: Phase,
    event_tx: broadcast::Sender<LifecycleEvent>,
    cancel: CancellationToken,
}

impl Bootstrapper {
    pub fn new(config: BootstrapConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            phase: Phase::Discovering,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to lifecycle events. Subscribe before calling
    /// [`Bootstrapper::bootstrap`] to observe the full phase sequence.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Cancel the run: outstanding handshakes fail with reason `"cancelled"`
    /// and the phase machine ends in `failed`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the full bootstrap sequence. Never fails; returns the peers that
    /// made it through registration, enriched by later phases.
    pub async fn bootstrap(&mut self, additional_peers_json: Option<&str>) -> Vec<BootstrapResult> {
        // A fresh run restarts the phase machine silently.
        self.phase = Phase::Discovering;

        // ── Discovering ──────────────────────────────────────────────────────
        let additional = match additional_peers_json {
            None => Vec::new(),
            Some(json) => match parse_known_peers(json) {
                Ok(peers) => peers,
                Err(e) => {
                    warn!(error = %e, "additional peers JSON ignored");
                    Vec::new()
                }
            },
        };
        let peers = self
            .config
            .sources
            .load(vec![self.config.known_peers.clone(), additional])
            .await;
        info!(count = peers.len(), "peer set assembled");
        for peer in &peers {
            self.emit(LifecycleEvent::PeerDiscovered {
                pubkey: peer.pubkey.clone(),
                ilp_address: peer.ilp_address.clone(),
            });
        }

        // ── Registering ──────────────────────────────────────────────────────
        self.set_phase(Phase::Registering);
        let mut results = Vec::new();
        for peer in &peers {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.bootstrap_with_peer(peer).await {
                Ok(result) => {
                    self.emit(LifecycleEvent::PeerRegistered {
                        peer_id: result.peer_id.clone(),
                        pubkey: peer.pubkey.clone(),
                        ilp_address: result.descriptor.ilp_address.clone(),
                    });
                    results.push(result);
                }
                Err(e) => warn!(pubkey = %peer.pubkey, error = %e, "peer bootstrap failed"),
            }
        }

        if self.config.sender.is_some() {
            // ── Handshaking ──────────────────────────────────────────────────
            self.set_phase(Phase::Handshaking);
            self.handshake_phase(&mut results).await;

            // ── Announcing ───────────────────────────────────────────────────
            self.set_phase(Phase::Announcing);
            self.announce_phase(&results).await;
        }

        // ── Ready ────────────────────────────────────────────────────────────
        if self.cancel.is_cancelled() {
            self.set_phase(Phase::Failed);
            return results;
        }
        self.set_phase(Phase::Ready);
        let channel_count = results.iter().filter(|r| r.channel_id.is_some()).count();
        self.emit(LifecycleEvent::Ready {
            peer_count: results.len(),
            channel_count,
        });
        info!(peers = results.len(), channels = channel_count, "bootstrap ready");
        results
    }

    /// Fetch one peer's descriptor from its relay and register it with the
    /// connector.
    pub async fn bootstrap_with_peer(
        &self,
        peer: &KnownPeer,
    ) -> Result<BootstrapResult, BootstrapError> {
        if !is_valid_pubkey(&peer.pubkey) {
            return Err(BootstrapError::InvalidPeer(peer.pubkey.clone()));
        }

        let relay = RelayClient::connect(&peer.relay_url).await?;
        let filter = Filter::new()
            .kinds([KIND_PEER_INFO])
            .authors([peer.pubkey.clone()])
            .limit(1);
        let events = relay.query(filter, self.config.query_timeout).await?;

        let newest = events
            .into_iter()
            .reduce(|best, candidate| if candidate.supersedes(&best) { candidate } else { best });
        let Some(newest) = newest else {
            relay.shutdown().await;
            return Err(BootstrapError::NoPeerInfo(peer.pubkey.clone()));
        };

        let descriptor = match crosstown_event::parse_peer_info(&newest) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                relay.shutdown().await;
                return Err(e.into());
            }
        };
        let peer_id = peer_id_for(&peer.pubkey);

        if let Some(admin) = &self.config.admin {
            let registration = basic_registration(&peer_id, &descriptor);
            if let Err(e) = admin.add_peer(registration).await {
                // The peer still flows into later phases; a connector restart
                // can pick the registration up on the next run.
                warn!(%peer_id, error = %e, "connector registration failed");
            }
        }

        // Relay-publish-only nodes announce immediately; nodes with a packet
        // sender defer announcement to the announcing phase.
        if self.config.sender.is_none() {
            let own_event = build_peer_info(&self.config.own_descriptor, &self.config.keys)?;
            if let Err(e) = relay.publish(&own_event).await {
                warn!(relay = %peer.relay_url, error = %e, "descriptor publish failed");
            }
        }

        relay.shutdown().await;
        Ok(BootstrapResult {
            peer: peer.clone(),
            descriptor,
            peer_id,
            channel_id: None,
            negotiated_chain: None,
            settlement_address: None,
        })
    }

    async fn handshake_phase(&self, results: &mut [BootstrapResult]) {
        let Some(sender) = self.config.sender.clone() else {
            return;
        };
        let client = SpspClient::new(
            self.config.keys.clone(),
            self.config.codec.clone(),
            sender,
        );

        for result in results.iter_mut() {
            let options = SpspRequestOptions {
                amount: Some("0".to_string()),
                timeout: None,
                settlement: self.config.settlement.clone(),
            };
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.emit(LifecycleEvent::HandshakeFailed {
                        peer_id: result.peer_id.clone(),
                        reason: "cancelled".to_string(),
                    });
                    continue;
                }
                outcome = client.request_spsp_info(
                    &result.peer.pubkey,
                    &result.descriptor.ilp_address,
                    options,
                ) => outcome,
            };

            match outcome {
                Ok(info) => {
                    debug!(peer = %result.peer_id, "handshake fulfilled");
                    if let Some(settlement) = info.settlement {
                        self.install_settlement(result, &settlement).await;
                    }
                }
                Err(e) => {
                    self.emit(LifecycleEvent::HandshakeFailed {
                        peer_id: result.peer_id.clone(),
                        reason: handshake_reason(&e),
                    });
                }
            }
        }
    }

    /// Merge negotiated settlement into the peer's registration and record it
    /// on the result.
    async fn install_settlement(&self, result: &mut BootstrapResult, settlement: &PeerSettlement) {
        if let Some(admin) = &self.config.admin {
            let mut registration = basic_registration(&result.peer_id, &result.descriptor);
            registration.settlement = Some(settlement_details(settlement));
            if let Err(e) = admin.add_peer(registration).await {
                warn!(peer = %result.peer_id, error = %e, "settlement registration failed");
            }
        }

        result.negotiated_chain = Some(settlement.chain.clone());
        result.settlement_address = settlement.settlement_address.clone();
        result.channel_id = settlement.channel_id.clone();
        if let Some(channel_id) = &settlement.channel_id {
            self.emit(LifecycleEvent::ChannelOpened {
                peer_id: result.peer_id.clone(),
                channel_id: channel_id.clone(),
                chain: settlement.chain.clone(),
            });
        }
    }

    async fn announce_phase(&self, results: &[BootstrapResult]) {
        let Some(sender) = &self.config.sender else {
            return;
        };
        let event = match build_peer_info(&self.config.own_descriptor, &self.config.keys) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "announce event build failed");
                return;
            }
        };
        let toon = self.config.codec.encode(&event);
        let amount = (self.config.base_price_per_byte * toon.len() as u64).to_string();
        let data = BASE64.encode(&toon);

        for result in results {
            if self.cancel.is_cancelled() {
                return;
            }
            let packet = OutgoingPacket {
                destination: result.descriptor.ilp_address.clone(),
                amount: amount.clone(),
                data: data.clone(),
                timeout: None,
            };
            // Announces are never retried; the next bootstrap run repeats them.
            match sender.send(packet).await {
                Ok(reply) if reply.accepted => {
                    self.emit(LifecycleEvent::Announced {
                        peer_id: result.peer_id.clone(),
                        event_id: event.id.clone(),
                        amount: amount.clone(),
                    });
                }
                Ok(reply) => {
                    let code = reply.code.unwrap_or_else(|| "T00".to_string());
                    let message = reply.message.unwrap_or_default();
                    self.emit(LifecycleEvent::AnnounceFailed {
                        peer_id: result.peer_id.clone(),
                        reason: format!("{code} {message}"),
                    });
                }
                Err(e) => {
                    self.emit(LifecycleEvent::AnnounceFailed {
                        peer_id: result.peer_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;
        info!(%from, %to, "bootstrap phase");
        self.emit(LifecycleEvent::PhaseChanged { from, to });
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine; nobody is forced to listen.
        let _ = self.event_tx.send(event);
    }
}

/// The registration installed at discovery time, before any settlement.
pub(crate) fn basic_registration(peer_id: &str, descriptor: &PeerDescriptor) -> PeerRegistration {
    PeerRegistration {
        id: peer_id.to_string(),
        url: descriptor.btp_endpoint.clone(),
        auth_token: String::new(),
        routes: vec![Route {
            prefix: descriptor.ilp_address.clone(),
            priority: None,
        }],
        settlement: None,
    }
}

pub(crate) fn settlement_details(settlement: &PeerSettlement) -> SettlementDetails {
    SettlementDetails {
        preference: settlement.chain.clone(),
        channel_id: settlement.channel_id.clone(),
        address: settlement.settlement_address.clone(),
        token_address: settlement.token_address.clone(),
        token_network: settlement.token_network_address.clone(),
        settlement_timeout: settlement.settlement_timeout,
    }
}

/// Reject reasons keep the ILP code visible (`"F06 Insufficient amount"`).
pub(crate) fn handshake_reason(error: &SpspError) -> String {
    match error {
        SpspError::Rejected { code, message } => format!("{code} {message}"),
        other => other.to_string(),
    }
}
