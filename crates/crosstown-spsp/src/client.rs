// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! SPSP client — requests payment parameters from a peer over ILP.
//!
//! The request is an encrypted kind-23194 event, TOON-encoded and carried as
//! the data payload of an ILP PREPARE to the peer's ILP address. The peer
//! answers by fulfilling the packet with a TOON-encoded kind-23195 event.
//!
//! # Retry policy
//!
//! An explicit REJECT is final — the remote saw the request and said no.
//! A transport failure is retried exactly once with the same packet; a second
//! failure surfaces as [`SpspError::Timeout`].

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::debug;

use crosstown_connector::{OutgoingPacket, PacketSender};
use crosstown_event::{
    build_spsp_request, is_valid_pubkey, parse_spsp_response, Keys, SettlementInfo,
};
use crosstown_toon::EventCodec;

use crate::error::SpspError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for one SPSP exchange.
#[derive(Debug, Clone, Default)]
pub struct SpspRequestOptions {
    /// Decimal string amount attached to the PREPARE. Defaults to `"0"`.
    pub amount: Option<String>,
    pub timeout: Option<Duration>,
    /// Our settlement offer, embedded in the encrypted request.
    pub settlement: Option<SettlementInfo>,
}

/// Settlement terms the peer reported back, if negotiation succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSettlement {
    pub chain: String,
    /// The peer's settlement address on `chain`.
    pub settlement_address: Option<String>,
    pub token_address: Option<String>,
    pub token_network_address: Option<String>,
    pub channel_id: Option<String>,
    pub settlement_timeout: Option<u64>,
}

/// Payment parameters obtained from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpspInfo {
    pub destination_account: String,
    /// Base64-encoded shared secret.
    pub shared_secret: String,
    pub settlement: Option<PeerSettlement>,
}

pub struct SpspClient {
    keys: Keys,
    codec: Arc<dyn EventCodec>,
    sender: Arc<dyn PacketSender>,
}

impl SpspClient {
    pub fn new(keys: Keys, codec: Arc<dyn EventCodec>, sender: Arc<dyn PacketSender>) -> Self {
        Self { keys, codec, sender }
    }

    /// Request SPSP parameters from `recipient_pubkey` at `peer_ilp_address`.
    pub async fn request_spsp_info(
        &self,
        recipient_pubkey: &str,
        peer_ilp_address: &str,
        options: SpspRequestOptions,
    ) -> Result<SpspInfo, SpspError> {
        if !is_valid_pubkey(recipient_pubkey) {
            return Err(SpspError::InvalidArgument(format!(
                "malformed recipient pubkey {recipient_pubkey:?}"
            )));
        }

        let (event, request_id) =
            build_spsp_request(recipient_pubkey, &self.keys, options.settlement.as_ref())?;
        let packet = OutgoingPacket {
            destination: peer_ilp_address.to_string(),
            amount: options.amount.unwrap_or_else(|| "0".to_string()),
            data: BASE64.encode(self.codec.encode(&event)),
            timeout: Some(options.timeout.unwrap_or(DEFAULT_TIMEOUT)),
        };

        let reply = match self.sender.send(packet.clone()).await {
            Ok(reply) => reply,
            Err(first) => {
                debug!(%recipient_pubkey, error = %first, "SPSP send failed, retrying once");
                match self.sender.send(packet).await {
                    Ok(reply) => reply,
                    Err(second) => {
                        return Err(SpspError::Timeout(format!("{first}; retry: {second}")))
                    }
                }
            }
        };

        if !reply.accepted {
            return Err(SpspError::Rejected {
                code: reply.code.unwrap_or_else(|| "T00".to_string()),
                message: reply.message.unwrap_or_default(),
            });
        }

        let data = reply
            .data
            .ok_or_else(|| SpspError::BadResponse("fulfillment carried no data".into()))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|e| SpspError::BadResponse(format!("response base64: {e}")))?;
        let response_event = self.codec.decode(&bytes)?;
        let response = parse_spsp_response(&response_event, &self.keys, recipient_pubkey)?;

        if response.request_id != request_id {
            return Err(SpspError::BadResponse(format!(
                "request id mismatch: sent {request_id}, got {}",
                response.request_id
            )));
        }

        let settlement = response.negotiated_chain.map(|chain| PeerSettlement {
            chain,
            settlement_address: response.settlement_address,
            token_address: response.token_address,
            token_network_address: response.token_network_address,
            channel_id: response.channel_id,
            settlement_timeout: response.settlement_timeout,
        });

        Ok(SpspInfo {
            destination_account: response.destination_account,
            shared_secret: response.shared_secret,
            settlement,
        })
    }
}
