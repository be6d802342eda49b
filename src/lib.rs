// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Crosstown — peer-to-peer payment routing over Nostr discovery and ILP
//! settlement.
//!
//! Agents publish signed peer descriptors on the relay bus, discover each
//! other through it, negotiate a settlement chain over encrypted SPSP
//! events, open an on-chain payment channel through the local connector, and
//! exchange further control events as TOON-encoded ILP packet payloads.
//!
//! This crate is the facade: it re-exports the workspace crates so a
//! composition root needs a single dependency.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crosstown::{BootstrapConfig, Bootstrapper, Keys, PeerDescriptor};
//!
//! # async fn example(admin: Arc<dyn crosstown::AdminClient>) {
//! let keys = Keys::generate();
//! let descriptor = PeerDescriptor {
//!     ilp_address: "g.crosstown.me".into(),
//!     btp_endpoint: "wss://me.example:7768".into(),
//!     asset_code: "USD".into(),
//!     asset_scale: 9,
//!     supported_chains: None,
//!     settlement_addresses: None,
//!     preferred_tokens: None,
//!     token_networks: None,
//! };
//! let mut config = BootstrapConfig::new(keys, descriptor);
//! config.admin = Some(admin);
//!
//! let mut bootstrapper = Bootstrapper::new(config);
//! let results = bootstrapper.bootstrap(None).await;
//! println!("joined through {} peers", results.len());
//! # }
//! ```

pub use crosstown_bootstrap::{
    genesis_peers, merge_peers, parse_known_peers, BootstrapConfig, BootstrapError,
    BootstrapResult, Bootstrapper, DiscoveredPeer, KnownPeer, LifecycleEvent, MonitorConfig,
    MonitorHandle, PeeringResult, Phase, RelayMonitor,
};
pub use crosstown_connector::{
    peer_id_for, AdminClient, ChannelClient, ChannelOpen, ChannelState, ChannelStatus,
    ConnectorError, OpenChannelRequest, OutgoingPacket, PacketReply, PacketSender,
    PeerRegistration, Route, SettlementDetails,
};
pub use crosstown_event::{
    build_peer_info, build_peer_tombstone, build_spsp_request, build_spsp_response,
    is_valid_pubkey, parse_peer_info, parse_spsp_request, parse_spsp_response, Event, EventDraft,
    EventError, Keys, PeerDescriptor, SettlementInfo, SpspRequest, SpspResponse, KIND_PEER_INFO,
    KIND_SPSP_REQUEST, KIND_SPSP_RESPONSE,
};
pub use crosstown_relay::{
    Filter, RelayClient, RelayError, RelayOptions, Subscription, SubscriptionMessage,
};
pub use crosstown_spsp::{
    negotiate_chain, resolve_token, NegotiatedSettlement, PeerSettlement,
    SettlementNegotiationConfig, SpspClient, SpspError, SpspInfo, SpspParams, SpspParamsProvider,
    SpspRequestOptions, SpspServer, SpspServerConfig, SpspServerHandle,
};
pub use crosstown_toon::{EventCodec, ToonCodec, ToonDecodeError};
