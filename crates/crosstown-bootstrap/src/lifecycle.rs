// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Lifecycle events emitted by the orchestrator and the monitor.
//!
//! Emission goes through a `tokio::sync::broadcast` channel: sending never
//! blocks, a slow listener lags and misses events instead of back-pressuring
//! bootstrap, and a listener can never poison orchestrator state.

/// Bootstrap phases, strictly monotonic within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    Registering,
    Handshaking,
    Announcing,
    Ready,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Discovering => "discovering",
            Phase::Registering => "registering",
            Phase::Handshaking => "handshaking",
            Phase::Announcing => "announcing",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Everything observers can learn about bootstrap and peering progress.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
    },
    PeerDiscovered {
        pubkey: String,
        ilp_address: Option<String>,
    },
    PeerRegistered {
        peer_id: String,
        pubkey: String,
        ilp_address: String,
    },
    HandshakeFailed {
        peer_id: String,
        reason: String,
    },
    ChannelOpened {
        peer_id: String,
        channel_id: String,
        chain: String,
    },
    Announced {
        peer_id: String,
        event_id: String,
        amount: String,
    },
    AnnounceFailed {
        peer_id: String,
        reason: String,
    },
    PeerDeregistered {
        peer_id: String,
        pubkey: String,
        reason: String,
    },
    Ready {
        peer_count: usize,
        channel_count: usize,
    },
}
