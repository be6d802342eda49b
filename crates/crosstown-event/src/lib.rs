// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Signed control events for the Crosstown relay layer.
//!
//! This crate owns identity (BIP-340 keypairs), the NIP-01 event shape with
//! its id hash and Schnorr signature, NIP-44 payload encryption, and the
//! builders/parsers for the three event kinds the protocol speaks:
//! peer descriptors (10032) and the encrypted SPSP request/response pair
//! (23194/23195).

pub mod codec;
pub mod error;
pub mod event;
pub mod keys;
pub mod nip44;
pub mod payload;

pub use codec::{
    build_peer_info, build_peer_tombstone, build_spsp_request, build_spsp_response,
    parse_peer_info, parse_spsp_request, parse_spsp_response,
};
pub use error::EventError;
pub use event::{Event, EventDraft, KIND_PEER_INFO, KIND_SPSP_REQUEST, KIND_SPSP_RESPONSE};
pub use keys::{is_valid_pubkey, Keys};
pub use payload::{PeerDescriptor, SettlementInfo, SpspRequest, SpspResponse};
