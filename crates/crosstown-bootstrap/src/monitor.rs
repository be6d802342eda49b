// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Relay monitor — continuous peer discovery on one relay.
//!
//! # Design
//!
//! ```text
//!   relay subscription ──┐
//!                        ├──► monitor loop (owns discovered/peered maps)
//!   MonitorHandle cmds ──┘            │
//!                                     ├─► broadcast<LifecycleEvent>
//!   handshake tasks ──► HandshakeDone ┘
//! ```
//!
//! The loop owns both maps, so every per-pubkey transition is serialized:
//! duplicate descriptor events are stale-checked, `peer_with` marks a peer as
//! peered *before* its handshake starts (a concurrent duplicate can never
//! re-register it), and tombstones deregister exactly once.
//!
//! Discovery never peers automatically — the caller inspects
//! [`MonitorHandle::discovered_peers`] and decides with
//! [`MonitorHandle::peer_with`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crosstown_connector::{peer_id_for, AdminClient, PacketSender};
use crosstown_event::{Event, Keys, PeerDescriptor, SettlementInfo, KIND_PEER_INFO};
use crosstown_relay::{Filter, RelayClient, Subscription, SubscriptionMessage};
use crosstown_spsp::{SpspClient, SpspRequestOptions};
use crosstown_toon::EventCodec;

use crate::error::BootstrapError;
use crate::lifecycle::LifecycleEvent;
use crate::orchestrator::{basic_registration, handshake_reason, settlement_details};

/// Monitor wiring. `admin` and `sender` must both be present for
/// [`MonitorHandle::peer_with`] to work.
pub struct MonitorConfig {
    pub keys: Keys,
    pub relay_url: String,
    /// Amount attached to the paid handshake PREPARE.
    pub handshake_amount: String,
    /// Our settlement offer for handshakes.
    pub settlement: Option<SettlementInfo>,
    pub codec: Arc<dyn EventCodec>,
    pub admin: Option<Arc<dyn AdminClient>>,
    pub sender: Option<Arc<dyn PacketSender>>,
    /// Delay before re-subscribing after the relay connection drops.
    pub resubscribe_delay: Duration,
}

impl MonitorConfig {
    pub fn new(keys: Keys, relay_url: impl Into<String>) -> Self {
        Self {
            keys,
            relay_url: relay_url.into(),
            handshake_amount: "1".to_string(),
            settlement: None,
            codec: Arc::new(crosstown_toon::ToonCodec),
            admin: None,
            sender: None,
            resubscribe_delay: Duration::from_secs(10),
        }
    }
}

/// A peer seen on the relay but not peered with.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub pubkey: String,
    pub descriptor: PeerDescriptor,
    pub created_at: i64,
}

/// Outcome of `peer_with`: registration always happened; channel fields are
/// present when the handshake negotiated settlement.
#[derive(Debug, Clone)]
pub struct PeeringResult {
    pub peer_id: String,
    pub pubkey: String,
    pub channel_id: Option<String>,
    pub negotiated_chain: Option<String>,
}

enum MonitorCommand {
    PeerWith {
        pubkey: String,
        reply: oneshot::Sender<Result<PeeringResult, BootstrapError>>,
    },
    DiscoveredPeers {
        reply: oneshot::Sender<Vec<DiscoveredPeer>>,
    },
    IsPeered {
        pubkey: String,
        reply: oneshot::Sender<bool>,
    },
    /// Internal write-back from a finished handshake task.
    HandshakeDone {
        pubkey: String,
        result: PeeringResult,
    },
}

/// Cheap-to-clone handle to a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    cmd_tx: mpsc::Sender<MonitorCommand>,
    event_tx: broadcast::Sender<LifecycleEvent>,
    cancel: CancellationToken,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    /// Register and handshake with a previously discovered peer.
    ///
    /// Idempotent: a second call for the same pubkey returns the stored
    /// result without touching the connector again.
    pub async fn peer_with(&self, pubkey: &str) -> Result<PeeringResult, BootstrapError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(MonitorCommand::PeerWith {
                pubkey: pubkey.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| BootstrapError::Stopped)?;
        reply_rx.await.map_err(|_| BootstrapError::Stopped)?
    }

    /// Peers seen on the relay and not yet peered with.
    pub async fn discovered_peers(&self) -> Result<Vec<DiscoveredPeer>, BootstrapError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(MonitorCommand::DiscoveredPeers { reply: reply_tx })
            .await
            .map_err(|_| BootstrapError::Stopped)?;
        reply_rx.await.map_err(|_| BootstrapError::Stopped)
    }

    pub async fn is_peered(&self, pubkey: &str) -> Result<bool, BootstrapError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(MonitorCommand::IsPeered {
                pubkey: pubkey.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| BootstrapError::Stopped)?;
        reply_rx.await.map_err(|_| BootstrapError::Stopped)
    }

    /// Stop event intake. In-flight handshakes complete but emit no further
    /// lifecycle events.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Spawns the monitor loop.
pub struct RelayMonitor;

impl RelayMonitor {
    pub async fn start(config: MonitorConfig) -> Result<MonitorHandle, BootstrapError> {
        let relay = RelayClient::connect(&config.relay_url).await?;
        let subscription = relay
            .subscribe(Filter::new().kinds([KIND_PEER_INFO]))
            .await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(256);
        let cancel = CancellationToken::new();

        let monitor = MonitorLoop {
            config,
            relay,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            event_tx: event_tx.clone(),
            cancel: cancel.clone(),
            discovered: HashMap::new(),
            peered: HashMap::new(),
        };
        tokio::spawn(monitor.run(subscription));

        Ok(MonitorHandle {
            cmd_tx,
            event_tx,
            cancel,
        })
    }
}

struct DiscoveredRecord {
    descriptor: PeerDescriptor,
    created_at: i64,
    event_id: String,
}

struct PeeredRecord {
    result: PeeringResult,
}

struct MonitorLoop {
    config: MonitorConfig,
    relay: RelayClient,
    cmd_rx: mpsc::Receiver<MonitorCommand>,
    cmd_tx: mpsc::Sender<MonitorCommand>,
    event_tx: broadcast::Sender<LifecycleEvent>,
    cancel: CancellationToken,
    discovered: HashMap<String, DiscoveredRecord>,
    peered: HashMap<String, PeeredRecord>,
}

impl MonitorLoop {
    async fn run(mut self, subscription: Subscription) {
        info!(relay = %self.config.relay_url, "relay monitor started");
        let mut subscription = Some(subscription);
        let mut reconnect_at = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                msg = recv_or_pending(&mut subscription) => match msg {
                    Some(SubscriptionMessage::Event(event)) => self.handle_event(event).await,
                    Some(SubscriptionMessage::EndOfStored) => {}
                    None => {
                        warn!(relay = %self.config.relay_url, "monitor subscription lost");
                        subscription = None;
                        reconnect_at =
                            tokio::time::Instant::now() + self.config.resubscribe_delay;
                    }
                },

                _ = tokio::time::sleep_until(reconnect_at), if subscription.is_none() => {
                    match self.resubscribe().await {
                        Ok(renewed) => subscription = Some(renewed),
                        Err(e) => {
                            debug!(error = %e, "monitor resubscribe failed");
                            reconnect_at =
                                tokio::time::Instant::now() + self.config.resubscribe_delay;
                        }
                    }
                }
            }
        }

        if let Some(mut subscription) = subscription {
            subscription.close().await;
        }
        self.relay.shutdown().await;
        info!(relay = %self.config.relay_url, "relay monitor stopped");
    }

    async fn resubscribe(&mut self) -> Result<Subscription, BootstrapError> {
        let relay = RelayClient::connect(&self.config.relay_url).await?;
        let subscription = relay
            .subscribe(Filter::new().kinds([KIND_PEER_INFO]))
            .await?;
        self.relay = relay;
        info!(relay = %self.config.relay_url, "monitor resubscribed");
        Ok(subscription)
    }

    // ── Event intake ─────────────────────────────────────────────────────────

    async fn handle_event(&mut self, event: Event) {
        if event.pubkey == self.config.keys.public_key() || event.kind != KIND_PEER_INFO {
            return;
        }
        if let Err(e) = event.verify() {
            debug!(pubkey = %event.pubkey, error = %e, "unverifiable peer event dropped");
            return;
        }

        if event.is_tombstone() {
            self.handle_tombstone(&event.pubkey).await;
            return;
        }

        // Stale replay of an older descriptor: first-writer wins.
        if let Some(existing) = self.discovered.get(&event.pubkey) {
            let newer = event.created_at > existing.created_at
                || (event.created_at == existing.created_at && event.id > existing.event_id);
            if !newer {
                debug!(pubkey = %event.pubkey, "stale descriptor ignored");
                return;
            }
        }

        let descriptor = match PeerDescriptor::parse(&event.content) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(pubkey = %event.pubkey, error = %e, "malformed descriptor dropped");
                return;
            }
        };

        let first_sighting = !self.discovered.contains_key(&event.pubkey);
        let ilp_address = descriptor.ilp_address.clone();
        self.discovered.insert(
            event.pubkey.clone(),
            DiscoveredRecord {
                descriptor,
                created_at: event.created_at,
                event_id: event.id,
            },
        );

        if first_sighting {
            info!(pubkey = %event.pubkey, %ilp_address, "peer discovered");
            self.emit(LifecycleEvent::PeerDiscovered {
                pubkey: event.pubkey,
                ilp_address: Some(ilp_address),
            });
        }
    }

    async fn handle_tombstone(&mut self, pubkey: &str) {
        self.discovered.remove(pubkey);
        let Some(record) = self.peered.remove(pubkey) else {
            // Tombstone for a peer we never peered with: nothing to undo.
            return;
        };

        let peer_id = record.result.peer_id;
        if let Some(admin) = &self.config.admin {
            if let Err(e) = admin.remove_peer(&peer_id).await {
                warn!(%peer_id, error = %e, "connector deregistration failed");
            }
        }
        info!(%peer_id, %pubkey, "peer deregistered");
        self.emit(LifecycleEvent::PeerDeregistered {
            peer_id,
            pubkey: pubkey.to_string(),
            reason: "empty-content".to_string(),
        });
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::PeerWith { pubkey, reply } => {
                self.handle_peer_with(pubkey, reply).await;
            }
            MonitorCommand::DiscoveredPeers { reply } => {
                let peers = self
                    .discovered
                    .iter()
                    .filter(|(pubkey, _)| !self.peered.contains_key(*pubkey))
                    .map(|(pubkey, record)| DiscoveredPeer {
                        pubkey: pubkey.clone(),
                        descriptor: record.descriptor.clone(),
                        created_at: record.created_at,
                    })
                    .collect();
                let _ = reply.send(peers);
            }
            MonitorCommand::IsPeered { pubkey, reply } => {
                let _ = reply.send(self.peered.contains_key(&pubkey));
            }
            MonitorCommand::HandshakeDone { pubkey, result } => {
                if let Some(record) = self.peered.get_mut(&pubkey) {
                    record.result = result;
                }
            }
        }
    }

    async fn handle_peer_with(
        &mut self,
        pubkey: String,
        reply: oneshot::Sender<Result<PeeringResult, BootstrapError>>,
    ) {
        // Idempotence first: an already-peered pubkey is a no-op.
        if let Some(record) = self.peered.get(&pubkey) {
            let _ = reply.send(Ok(record.result.clone()));
            return;
        }
        let Some(record) = self.discovered.get(&pubkey) else {
            let _ = reply.send(Err(BootstrapError::PeerNotDiscovered(pubkey)));
            return;
        };
        let descriptor = record.descriptor.clone();
        let (Some(admin), Some(sender)) = (self.config.admin.clone(), self.config.sender.clone())
        else {
            let _ = reply.send(Err(BootstrapError::Unconfigured(
                "AdminClient and PacketSender",
            )));
            return;
        };

        let peer_id = peer_id_for(&pubkey);
        if let Err(e) = admin.add_peer(basic_registration(&peer_id, &descriptor)).await {
            let _ = reply.send(Err(BootstrapError::Registration(e.to_string())));
            return;
        }
        self.emit(LifecycleEvent::PeerRegistered {
            peer_id: peer_id.clone(),
            pubkey: pubkey.clone(),
            ilp_address: descriptor.ilp_address.clone(),
        });

        // Mark as peered before the handshake runs, so duplicate descriptor
        // events processed meanwhile cannot trigger a second registration.
        let result = PeeringResult {
            peer_id: peer_id.clone(),
            pubkey: pubkey.clone(),
            channel_id: None,
            negotiated_chain: None,
        };
        self.peered.insert(
            pubkey.clone(),
            PeeredRecord {
                result: result.clone(),
            },
        );

        let handshake = Handshake {
            keys: self.config.keys.clone(),
            codec: self.config.codec.clone(),
            sender,
            admin,
            settlement: self.config.settlement.clone(),
            amount: self.config.handshake_amount.clone(),
            descriptor,
            event_tx: self.event_tx.clone(),
            cmd_tx: self.cmd_tx.clone(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(handshake.run(result, reply));
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Everything a spawned handshake task needs, detached from the loop.
struct Handshake {
    keys: Keys,
    codec: Arc<dyn EventCodec>,
    sender: Arc<dyn PacketSender>,
    admin: Arc<dyn AdminClient>,
    settlement: Option<SettlementInfo>,
    amount: String,
    descriptor: PeerDescriptor,
    event_tx: broadcast::Sender<LifecycleEvent>,
    cmd_tx: mpsc::Sender<MonitorCommand>,
    cancel: CancellationToken,
}

impl Handshake {
    async fn run(
        self,
        mut result: PeeringResult,
        reply: oneshot::Sender<Result<PeeringResult, BootstrapError>>,
    ) {
        let client = SpspClient::new(self.keys.clone(), self.codec.clone(), self.sender.clone());
        let options = SpspRequestOptions {
            amount: Some(self.amount.clone()),
            timeout: None,
            settlement: self.settlement.clone(),
        };

        let outcome = client
            .request_spsp_info(&result.pubkey, &self.descriptor.ilp_address, options)
            .await;

        match outcome {
            Ok(info) => {
                if let Some(settlement) = info.settlement {
                    let mut registration =
                        basic_registration(&result.peer_id, &self.descriptor);
                    registration.settlement = Some(settlement_details(&settlement));
                    if let Err(e) = self.admin.add_peer(registration).await {
                        warn!(peer = %result.peer_id, error = %e, "settlement registration failed");
                    }
                    result.negotiated_chain = Some(settlement.chain.clone());
                    result.channel_id = settlement.channel_id.clone();

                    if !self.cancel.is_cancelled() {
                        if let Some(channel_id) = &settlement.channel_id {
                            let _ = self.event_tx.send(LifecycleEvent::ChannelOpened {
                                peer_id: result.peer_id.clone(),
                                channel_id: channel_id.clone(),
                                chain: settlement.chain.clone(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                // The peer stays registered; only the settlement upgrade is lost.
                if !self.cancel.is_cancelled() {
                    let _ = self.event_tx.send(LifecycleEvent::HandshakeFailed {
                        peer_id: result.peer_id.clone(),
                        reason: handshake_reason(&e),
                    });
                }
            }
        }

        let _ = self
            .cmd_tx
            .send(MonitorCommand::HandshakeDone {
                pubkey: result.pubkey.clone(),
                result: result.clone(),
            })
            .await;
        let _ = reply.send(Ok(result));
    }
}

/// Pends forever when there is no live subscription, so the `select!` arm
/// stays quiet during reconnect backoff.
async fn recv_or_pending(subscription: &mut Option<Subscription>) -> Option<SubscriptionMessage> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
