// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! SPSP server — answers encrypted kind-23194 requests arriving on the relay
//! bus with kind-23195 responses.
//!
//! # Error policy
//!
//! Everything that goes wrong while handling one inbound event — decrypt
//! failure, parameter-generator failure, publish failure — is logged and
//! dropped. The subscription loop itself must never die because of a bad
//! event. Each event produces an explicit [`ProcessOutcome`] that the loop
//! inspects for logging and then continues unconditionally.
//!
//! Settlement negotiation degrades gracefully: when a chain cannot be agreed
//! on or the channel client fails, the response simply carries the basic SPSP
//! parameters and no settlement fields.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crosstown_connector::ChannelClient;
use crosstown_event::{
    build_spsp_response, parse_spsp_request, Event, Keys, SettlementInfo, SpspResponse,
    KIND_SPSP_REQUEST,
};
use crosstown_relay::{Filter, RelayClient, SubscriptionMessage};

use crate::error::SpspError;
use crate::settlement::{negotiate_and_open, SettlementNegotiationConfig};

/// Fresh SPSP parameters handed out per request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpspParams {
    pub destination_account: String,
    /// Base64-encoded shared secret.
    pub shared_secret: String,
}

/// Generates fresh parameters for each inbound request.
#[async_trait]
pub trait SpspParamsProvider: Send + Sync {
    async fn fresh_params(&self) -> Result<SpspParams, SpspError>;
}

/// Server wiring. `settlement` and `channels` must both be present for
/// settlement negotiation to run.
pub struct SpspServerConfig {
    pub relays: Vec<RelayClient>,
    pub settlement: Option<SettlementInfo>,
    pub negotiation: SettlementNegotiationConfig,
    pub channels: Option<Arc<dyn ChannelClient>>,
}

pub struct SpspServer {
    keys: Keys,
    params: Arc<dyn SpspParamsProvider>,
    config: SpspServerConfig,
}

/// Running server; dropping the handle does not stop it, call
/// [`SpspServerHandle::shutdown`].
pub struct SpspServerHandle {
    cancel: CancellationToken,
}

impl SpspServerHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Per-event processing outcome, inspected by the loop for logging only.
enum ProcessOutcome {
    Handled { request_id: Uuid },
    Ignored(&'static str),
    Failed(String),
}

impl SpspServer {
    pub fn new(
        keys: Keys,
        params: Arc<dyn SpspParamsProvider>,
        config: SpspServerConfig,
    ) -> Self {
        Self { keys, params, config }
    }

    /// Subscribe on every configured relay and serve until shut down.
    pub async fn serve(self) -> Result<SpspServerHandle, SpspError> {
        if self.config.relays.is_empty() {
            return Err(SpspError::Unconfigured("relay"));
        }

        let filter = Filter::new()
            .kinds([KIND_SPSP_REQUEST])
            .p_tag(self.keys.public_key().to_string());

        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel::<Event>(64);

        for relay in &self.config.relays {
            let mut subscription = relay
                .subscribe(filter.clone())
                .await
                .map_err(|e| SpspError::Relay(e.to_string()))?;
            let tx = event_tx.clone();
            let token = cancel.clone();
            let url = relay.url().to_string();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        msg = subscription.recv() => match msg {
                            Some(SubscriptionMessage::Event(event)) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Some(SubscriptionMessage::EndOfStored) => {}
                            None => {
                                warn!(%url, "SPSP request subscription ended");
                                break;
                            }
                        },
                    }
                }
                subscription.close().await;
            });
        }

        let token = cancel.clone();
        tokio::spawn(self.run(event_rx, token));
        Ok(SpspServerHandle { cancel })
    }

    async fn run(self, mut event_rx: mpsc::Receiver<Event>, cancel: CancellationToken) {
        info!(pubkey = %self.keys.public_key(), "SPSP server started");
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            // Bound the dedup set; the kinds served here are ephemeral.
            if seen.len() > 10_000 {
                seen.clear();
            }
            if !seen.insert(event.id.clone()) {
                continue;
            }

            let sender = event.pubkey.clone();
            match self.process(event).await {
                ProcessOutcome::Handled { request_id } => {
                    debug!(%sender, %request_id, "SPSP request served");
                }
                ProcessOutcome::Ignored(reason) => {
                    debug!(%sender, %reason, "SPSP event ignored");
                }
                ProcessOutcome::Failed(reason) => {
                    debug!(%sender, %reason, "SPSP event dropped");
                }
            }
        }
        info!("SPSP server stopped");
    }

    async fn process(&self, event: Event) -> ProcessOutcome {
        if event.pubkey == self.keys.public_key() {
            return ProcessOutcome::Ignored("own event");
        }

        let request = match parse_spsp_request(&event, &self.keys) {
            Ok(request) => request,
            Err(e) => return ProcessOutcome::Failed(e.to_string()),
        };

        let params = match self.params.fresh_params().await {
            Ok(params) => params,
            Err(e) => return ProcessOutcome::Failed(format!("params generator: {e}")),
        };

        let mut response = SpspResponse::basic(
            request.request_id,
            params.destination_account,
            params.shared_secret,
        );

        if let (Some(own), Some(channels)) = (&self.config.settlement, &self.config.channels) {
            match negotiate_and_open(
                &request,
                &event.pubkey,
                own,
                &self.config.negotiation,
                channels.as_ref(),
            )
            .await
            {
                Ok(Some(settled)) => {
                    response.negotiated_chain = Some(settled.chain);
                    response.settlement_address = settled.settlement_address;
                    response.token_address = settled.token_address;
                    response.token_network_address = settled.token_network_address;
                    response.channel_id = Some(settled.channel_id);
                    response.settlement_timeout = Some(settled.settlement_timeout);
                }
                Ok(None) => {}
                Err(e) => {
                    // Degrade to a basic response; the requester can still pay.
                    warn!(requester = %event.pubkey, error = %e, "settlement negotiation failed");
                }
            }
        }

        let response_event = match build_spsp_response(&response, &event.pubkey, &self.keys) {
            Ok(response_event) => response_event,
            Err(e) => return ProcessOutcome::Failed(e.to_string()),
        };

        for relay in &self.config.relays {
            if let Err(e) = relay.publish(&response_event).await {
                warn!(url = %relay.url(), error = %e, "SPSP response publish failed");
            }
        }

        ProcessOutcome::Handled {
            request_id: request.request_id,
        }
    }
}
