// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Build and parse the three control-event kinds.
//!
//! SPSP requests (23194) and responses (23195) are addressed: the payload is
//! NIP-44 ciphertext and the recipient is named in a `["p", pubkey]` tag.
//! Peer descriptors (10032) are public plain-JSON events.

use uuid::Uuid;

use crate::error::EventError;
use crate::event::{Event, EventDraft, KIND_PEER_INFO, KIND_SPSP_REQUEST, KIND_SPSP_RESPONSE};
use crate::keys::{is_valid_pubkey, Keys};
use crate::nip44;
use crate::payload::{PeerDescriptor, SettlementInfo, SpspRequest, SpspResponse};

/// Build an encrypted kind-23194 request addressed to `recipient_pubkey`.
///
/// Returns the signed event together with the generated request id the caller
/// correlates the response against.
pub fn build_spsp_request(
    recipient_pubkey: &str,
    sender: &Keys,
    settlement: Option<&SettlementInfo>,
) -> Result<(Event, Uuid), EventError> {
    if !is_valid_pubkey(recipient_pubkey) {
        return Err(EventError::InvalidKey("malformed recipient pubkey".into()));
    }
    let request = SpspRequest::new(settlement);
    let request_id = request.request_id;
    let plaintext = serde_json::to_string(&request)?;
    let ciphertext = nip44::encrypt(sender.secret_bytes(), recipient_pubkey, &plaintext)?;
    let event = EventDraft::new(KIND_SPSP_REQUEST, ciphertext)
        .to_pubkey(recipient_pubkey)
        .sign(sender)?;
    Ok((event, request_id))
}

/// Verify, decrypt, and parse an inbound kind-23194 event addressed to us.
pub fn parse_spsp_request(event: &Event, receiver: &Keys) -> Result<SpspRequest, EventError> {
    let plaintext = open_addressed(event, KIND_SPSP_REQUEST, receiver)?;
    Ok(serde_json::from_str(&plaintext)?)
}

/// Build an encrypted kind-23195 response addressed to `requester_pubkey`.
pub fn build_spsp_response(
    response: &SpspResponse,
    requester_pubkey: &str,
    responder: &Keys,
) -> Result<Event, EventError> {
    if !is_valid_pubkey(requester_pubkey) {
        return Err(EventError::InvalidKey("malformed requester pubkey".into()));
    }
    let plaintext = serde_json::to_string(response)?;
    let ciphertext = nip44::encrypt(responder.secret_bytes(), requester_pubkey, &plaintext)?;
    EventDraft::new(KIND_SPSP_RESPONSE, ciphertext)
        .to_pubkey(requester_pubkey)
        .sign(responder)
}

/// Verify, decrypt, and parse a kind-23195 event from `responder_pubkey`.
///
/// Settlement fields are optional in the payload; their absence is not an
/// error.
pub fn parse_spsp_response(
    event: &Event,
    requester: &Keys,
    responder_pubkey: &str,
) -> Result<SpspResponse, EventError> {
    if event.pubkey != responder_pubkey {
        return Err(EventError::InvalidEvent("response from unexpected author".into()));
    }
    let plaintext = open_addressed(event, KIND_SPSP_RESPONSE, requester)?;
    Ok(serde_json::from_str(&plaintext)?)
}

/// Build a public kind-10032 descriptor event. Content is plain JSON.
pub fn build_peer_info(descriptor: &PeerDescriptor, keys: &Keys) -> Result<Event, EventError> {
    let content = serde_json::to_string(descriptor)?;
    EventDraft::new(KIND_PEER_INFO, content).sign(keys)
}

/// Build an empty-content kind-10032 event announcing our departure.
pub fn build_peer_tombstone(keys: &Keys) -> Result<Event, EventError> {
    EventDraft::new(KIND_PEER_INFO, "").sign(keys)
}

/// Verify signature and parse a kind-10032 descriptor event.
pub fn parse_peer_info(event: &Event) -> Result<PeerDescriptor, EventError> {
    if event.kind != KIND_PEER_INFO {
        return Err(EventError::InvalidEvent(format!(
            "expected kind {KIND_PEER_INFO}, got {}",
            event.kind
        )));
    }
    event.verify()?;
    PeerDescriptor::parse(&event.content)
}

/// Common path for addressed, encrypted events: kind check, signature check,
/// addressee check, decrypt.
fn open_addressed(event: &Event, kind: u32, own: &Keys) -> Result<String, EventError> {
    if event.kind != kind {
        return Err(EventError::InvalidEvent(format!(
            "expected kind {kind}, got {}",
            event.kind
        )));
    }
    event.verify()?;
    match event.first_p_tag() {
        Some(addressee) if addressee == own.public_key() => {}
        Some(_) => return Err(EventError::InvalidEvent("event addressed to another key".into())),
        None => return Err(EventError::InvalidEvent("missing addressee tag".into())),
    }
    nip44::decrypt(own.secret_bytes(), &event.pubkey, &event.content)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn settlement_offer() -> SettlementInfo {
        let mut addresses = BTreeMap::new();
        addresses.insert("evm:base:8453".to_string(), "0xREQ".to_string());
        let mut tokens = BTreeMap::new();
        tokens.insert("evm:base:8453".to_string(), "0xTOK".to_string());
        SettlementInfo {
            supported_chains: vec!["evm:base:8453".into(), "xrp:mainnet".into()],
            settlement_addresses: addresses,
            preferred_tokens: tokens,
            token_networks: BTreeMap::new(),
        }
    }

    #[test]
    fn request_round_trips_with_settlement_fields() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let offer = settlement_offer();

        let (event, request_id) =
            build_spsp_request(receiver.public_key(), &sender, Some(&offer)).unwrap();
        assert_eq!(event.kind, KIND_SPSP_REQUEST);
        assert_eq!(event.first_p_tag(), Some(receiver.public_key()));

        let parsed = parse_spsp_request(&event, &receiver).unwrap();
        assert_eq!(parsed.request_id, request_id);
        assert_eq!(parsed.supported_chains.as_deref().unwrap(), offer.supported_chains);
        assert_eq!(
            parsed.settlement_addresses.as_ref().unwrap()["evm:base:8453"],
            "0xREQ"
        );
        assert_eq!(parsed.preferred_tokens.as_ref().unwrap()["evm:base:8453"], "0xTOK");
    }

    #[test]
    fn request_to_wrong_recipient_is_rejected() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let eavesdropper = Keys::generate();
        let (event, _) = build_spsp_request(receiver.public_key(), &sender, None).unwrap();
        assert!(matches!(
            parse_spsp_request(&event, &eavesdropper),
            Err(EventError::InvalidEvent(_))
        ));
    }

    #[test]
    fn response_round_trips() {
        let requester = Keys::generate();
        let responder = Keys::generate();
        let request_id = Uuid::new_v4();
        let mut response =
            SpspResponse::basic(request_id, "g.node.receiver".into(), "c2VjcmV0".into());
        response.negotiated_chain = Some("evm:base:8453".into());
        response.channel_id = Some("0xCH".into());

        let event = build_spsp_response(&response, requester.public_key(), &responder).unwrap();
        let parsed = parse_spsp_response(&event, &requester, responder.public_key()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn response_from_unexpected_author_is_rejected() {
        let requester = Keys::generate();
        let responder = Keys::generate();
        let impostor = Keys::generate();
        let response = SpspResponse::basic(Uuid::new_v4(), "g.x".into(), "c2Vj".into());
        let event = build_spsp_response(&response, requester.public_key(), &responder).unwrap();
        assert!(parse_spsp_response(&event, &requester, impostor.public_key()).is_err());
    }

    #[test]
    fn peer_info_round_trips_and_verifies() {
        let keys = Keys::generate();
        let descriptor = PeerDescriptor {
            ilp_address: "g.crosstown.node".into(),
            btp_endpoint: "ws://node:7768".into(),
            asset_code: "USD".into(),
            asset_scale: 9,
            supported_chains: None,
            settlement_addresses: None,
            preferred_tokens: None,
            token_networks: None,
        };
        let event = build_peer_info(&descriptor, &keys).unwrap();
        assert_eq!(event.kind, KIND_PEER_INFO);
        assert_eq!(parse_peer_info(&event).unwrap(), descriptor);
    }

    #[test]
    fn forged_peer_info_is_rejected() {
        let keys = Keys::generate();
        let descriptor = PeerDescriptor {
            ilp_address: "g.crosstown.node".into(),
            btp_endpoint: "ws://node:7768".into(),
            asset_code: "USD".into(),
            asset_scale: 9,
            supported_chains: None,
            settlement_addresses: None,
            preferred_tokens: None,
            token_networks: None,
        };
        let mut event = build_peer_info(&descriptor, &keys).unwrap();
        event.content = event.content.replace("g.crosstown.node", "g.evil.node");
        assert!(parse_peer_info(&event).is_err());
    }

    #[test]
    fn tombstone_has_empty_content() {
        let keys = Keys::generate();
        let event = build_peer_tombstone(&keys).unwrap();
        assert!(event.is_tombstone());
        event.verify().unwrap();
    }

    #[test]
    fn malformed_recipient_pubkey_is_invalid_argument() {
        let sender = Keys::generate();
        assert!(matches!(
            build_spsp_request("not-a-pubkey", &sender, None),
            Err(EventError::InvalidKey(_))
        ));
    }
}
