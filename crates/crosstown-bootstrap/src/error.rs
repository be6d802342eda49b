// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use crosstown_event::EventError;
use crosstown_relay::RelayError;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid peer pubkey: {0}")]
    InvalidPeer(String),

    #[error("no peer info published for {0}")]
    NoPeerInfo(String),

    #[error("peer not discovered: {0}")]
    PeerNotDiscovered(String),

    #[error("missing capability: {0}")]
    Unconfigured(&'static str),

    #[error("peer registration failed: {0}")]
    Registration(String),

    #[error("invalid peer JSON: {0}")]
    InvalidPeerJson(String),

    #[error("registry fetch failed: {0}")]
    Registry(String),

    #[error("monitor stopped")]
    Stopped,

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Event(#[from] EventError),
}
