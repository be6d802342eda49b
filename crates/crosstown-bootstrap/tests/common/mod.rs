//! Shared test fixtures: a loopback relay and connector capability doubles.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use crosstown_connector::{
    AdminClient, ConnectorError, OutgoingPacket, PacketReply, PacketSender, PeerRegistration,
};
use crosstown_event::{
    build_spsp_response, parse_spsp_request, Event, Keys, PeerDescriptor, SpspResponse,
    KIND_SPSP_REQUEST,
};
use crosstown_relay::Filter;

// ── Loopback relay ────────────────────────────────────────────────────────────

/// Minimal in-process relay: stores events, replays the newest matches on
/// `REQ` (NIP-01 `limit` keeps the most recent), forwards live events to open
/// subscriptions, acks publishes with `OK`.
pub async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let (live_tx, _) = broadcast::channel::<Event>(64);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(relay_conn(stream, store.clone(), live_tx.clone()));
        }
    });
    format!("ws://{addr}")
}

async fn relay_conn(
    stream: TcpStream,
    store: Arc<Mutex<Vec<Event>>>,
    live_tx: broadcast::Sender<Event>,
) {
    let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    let (mut tx, mut rx) = ws.split();
    let mut live_rx = live_tx.subscribe();
    let mut subs: Vec<(String, Filter)> = Vec::new();

    loop {
        tokio::select! {
            msg = rx.next() => {
                let Some(Ok(Message::Text(text))) = msg else { break };
                let frame: Vec<Value> = serde_json::from_str(&text).unwrap();
                match frame[0].as_str().unwrap() {
                    "EVENT" => {
                        let event: Event = serde_json::from_value(frame[1].clone()).unwrap();
                        let _ = tx.send(Message::Text(json!(["OK", event.id, true, ""]).to_string())).await;
                        store.lock().unwrap().push(event.clone());
                        let _ = live_tx.send(event);
                    }
                    "REQ" => {
                        let sub_id = frame[1].as_str().unwrap().to_string();
                        let filter: Filter = serde_json::from_value(frame[2].clone()).unwrap();
                        let mut matching: Vec<Event> = {
                            let store = store.lock().unwrap();
                            store.iter().filter(|e| filter.matches(e)).cloned().collect()
                        };
                        matching.sort_by(|a, b| {
                            (a.created_at, &a.id).cmp(&(b.created_at, &b.id))
                        });
                        if let Some(limit) = filter.limit {
                            let skip = matching.len().saturating_sub(limit as usize);
                            matching.drain(..skip);
                        }
                        for event in &matching {
                            let _ = tx.send(Message::Text(json!(["EVENT", sub_id, event]).to_string())).await;
                        }
                        let _ = tx.send(Message::Text(json!(["EOSE", sub_id]).to_string())).await;
                        subs.push((sub_id, filter));
                    }
                    "CLOSE" => {
                        let sub_id = frame[1].as_str().unwrap();
                        subs.retain(|(id, _)| id != sub_id);
                    }
                    _ => {}
                }
            }
            live = live_rx.recv() => {
                let Ok(event) = live else { continue };
                for (sub_id, filter) in &subs {
                    if filter.matches(&event) {
                        let _ = tx.send(Message::Text(json!(["EVENT", sub_id, event]).to_string())).await;
                    }
                }
            }
        }
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub fn descriptor(ilp_address: &str, btp_endpoint: &str) -> PeerDescriptor {
    PeerDescriptor {
        ilp_address: ilp_address.into(),
        btp_endpoint: btp_endpoint.into(),
        asset_code: "USD".into(),
        asset_scale: 9,
        supported_chains: None,
        settlement_addresses: None,
        preferred_tokens: None,
        token_networks: None,
    }
}

// ── AdminClient double ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingAdmin {
    pub added: Mutex<Vec<PeerRegistration>>,
    pub removed: Mutex<Vec<String>>,
}

impl RecordingAdmin {
    pub fn added(&self) -> Vec<PeerRegistration> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdminClient for RecordingAdmin {
    async fn add_peer(&self, peer: PeerRegistration) -> Result<(), ConnectorError> {
        self.added.lock().unwrap().push(peer);
        Ok(())
    }

    async fn remove_peer(&self, peer_id: &str) -> Result<(), ConnectorError> {
        self.removed.lock().unwrap().push(peer_id.to_string());
        Ok(())
    }
}

// ── PacketSender doubles ──────────────────────────────────────────────────────

/// Plays the remote peer: answers SPSP requests out of the packet data and
/// swallows announce packets, recording everything it sees.
pub struct RespondingSender {
    responder: Keys,
    pub settlement_chain: Option<String>,
    pub packets: Mutex<Vec<OutgoingPacket>>,
    pub sends: AtomicUsize,
}

impl RespondingSender {
    pub fn new(responder: Keys) -> Self {
        Self {
            responder,
            settlement_chain: None,
            packets: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
        }
    }

    pub fn with_settlement(responder: Keys, chain: &str) -> Self {
        Self {
            settlement_chain: Some(chain.to_string()),
            ..Self::new(responder)
        }
    }

    pub fn packets(&self) -> Vec<OutgoingPacket> {
        self.packets.lock().unwrap().clone()
    }
}

#[async_trait]
impl PacketSender for RespondingSender {
    async fn send(&self, packet: OutgoingPacket) -> Result<PacketReply, ConnectorError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.packets.lock().unwrap().push(packet.clone());

        let bytes = BASE64.decode(&packet.data).unwrap();
        let event = crosstown_toon::decode(&bytes).unwrap();
        if event.kind != KIND_SPSP_REQUEST {
            // Announce packet: fulfill without data.
            return Ok(PacketReply::fulfilled("cHJlaW1hZ2U=", None));
        }

        let request = parse_spsp_request(&event, &self.responder).unwrap();
        let mut response =
            SpspResponse::basic(request.request_id, "g.responder.spsp".into(), "c2VjcmV0".into());
        if let Some(chain) = &self.settlement_chain {
            response.negotiated_chain = Some(chain.clone());
            response.settlement_address = Some("0xPEER".into());
            response.channel_id = Some("0xCH".into());
            response.settlement_timeout = Some(86_400);
        }
        let response_event =
            build_spsp_response(&response, &event.pubkey, &self.responder).unwrap();
        Ok(PacketReply::fulfilled(
            "cHJlaW1hZ2U=",
            Some(BASE64.encode(crosstown_toon::encode(&response_event))),
        ))
    }
}

/// Rejects everything with `F06`.
#[derive(Default)]
pub struct RejectingSender {
    pub sends: AtomicUsize,
}

#[async_trait]
impl PacketSender for RejectingSender {
    async fn send(&self, _packet: OutgoingPacket) -> Result<PacketReply, ConnectorError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(PacketReply::rejected("F06", "Insufficient amount"))
    }
}
