// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Relay client for the Crosstown event bus.
//!
//! Speaks the NIP-01 WebSocket protocol (JSON array frames: `EVENT`, `REQ`,
//! `CLOSE` outbound; `EVENT`, `EOSE`, `OK`, `NOTICE` inbound). One socket per
//! [`RelayClient`]; subscriptions are multiplexed over it.

pub mod client;
pub mod error;
pub mod filter;

pub use client::{RelayClient, RelayOptions, Subscription, SubscriptionMessage};
pub use error::RelayError;
pub use filter::Filter;
