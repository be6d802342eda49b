// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! SPSP over encrypted control events.
//!
//! The client side ([`SpspClient`]) tunnels requests through ILP packets; the
//! server side ([`SpspServer`]) answers requests arriving on the relay bus.
//! Both share the settlement negotiation in [`settlement`].

pub mod client;
pub mod error;
pub mod server;
pub mod settlement;

pub use client::{PeerSettlement, SpspClient, SpspInfo, SpspRequestOptions};
pub use error::SpspError;
pub use server::{SpspParams, SpspParamsProvider, SpspServer, SpspServerConfig, SpspServerHandle};
pub use settlement::{
    negotiate_and_open, negotiate_chain, resolve_token, NegotiatedSettlement,
    SettlementNegotiationConfig,
};
