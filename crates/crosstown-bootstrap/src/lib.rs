// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Bootstrap-and-peering engine.
//!
//! [`Bootstrapper`] drives the startup sequence — aggregate peer sources,
//! fetch descriptors, register peers with the connector, handshake over ILP,
//! announce our own descriptor. [`RelayMonitor`] then watches the relay
//! continuously, surfacing new peers for explicit peering and honoring
//! tombstone deregistrations.

pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod orchestrator;
pub mod sources;

pub use error::BootstrapError;
pub use lifecycle::{LifecycleEvent, Phase};
pub use monitor::{DiscoveredPeer, MonitorConfig, MonitorHandle, PeeringResult, RelayMonitor};
pub use orchestrator::{BootstrapConfig, BootstrapResult, Bootstrapper};
pub use sources::{genesis_peers, merge_peers, parse_known_peers, KnownPeer, PeerSources};
