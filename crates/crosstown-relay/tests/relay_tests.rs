//! Relay client tests against an in-process loopback relay.
//!
//! The loopback relay implements just enough of the wire protocol: it stores
//! published events, replays matching stored events on `REQ` followed by
//! `EOSE`, forwards live events to open subscriptions, and acks publishes
//! with `OK`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crosstown_event::{Event, EventDraft, Keys, KIND_PEER_INFO};
use crosstown_relay::{Filter, RelayClient, RelayError, SubscriptionMessage};

// ── Loopback relay ────────────────────────────────────────────────────────────

struct LoopbackRelay {
    url: String,
}

async fn spawn_relay(seed: Vec<Event>) -> LoopbackRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Arc::new(Mutex::new(seed));
    let (live_tx, _) = broadcast::channel::<Event>(64);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_conn(stream, store.clone(), live_tx.clone()));
        }
    });

    LoopbackRelay {
        url: format!("ws://{addr}"),
    }
}

async fn handle_conn(
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
                        let ok = json!(["OK", event.id, true, ""]).to_string();
                        let _ = tx.send(Message::Text(ok)).await;
                        store.lock().await.push(event.clone());
                        let _ = live_tx.send(event);
                    }
                    "REQ" => {
                        let sub_id = frame[1].as_str().unwrap().to_string();
                        let filter: Filter = serde_json::from_value(frame[2].clone()).unwrap();
                        let stored = store.lock().await.clone();
                        let mut matching: Vec<Event> =
                            stored.into_iter().filter(|e| filter.matches(e)).collect();
                        if let Some(limit) = filter.limit {
                            let skip = matching.len().saturating_sub(limit as usize);
                            matching.drain(..skip);
                        }
                        for event in &matching {
                            let frame = json!(["EVENT", sub_id, event]).to_string();
                            let _ = tx.send(Message::Text(frame)).await;
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
                        let frame = json!(["EVENT", sub_id, event]).to_string();
                        let _ = tx.send(Message::Text(frame)).await;
                    }
                }
            }
        }
    }
}

/// A relay that accepts the WebSocket and then says nothing at all.
async fn spawn_silent_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (_tx, mut rx) = ws.split();
                while let Some(Ok(_)) = rx.next().await {}
            });
        }
    });
    format!("ws://{addr}")
}

fn peer_info_event(keys: &Keys, created_at: i64) -> Event {
    EventDraft::new(KIND_PEER_INFO, "{\"ilpAddress\":\"g.test\"}")
        .created_at(created_at)
        .sign(keys)
        .unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn publish_then_query_round_trip() {
    let relay = spawn_relay(Vec::new()).await;
    let client = RelayClient::connect(&relay.url).await.unwrap();

    let keys = Keys::generate();
    let event = peer_info_event(&keys, 1000);
    client.publish(&event).await.unwrap();

    let found = client
        .query(
            Filter::new().kinds([KIND_PEER_INFO]).authors([keys.public_key().to_string()]),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(found, vec![event]);
}

#[tokio::test]
async fn query_replays_seeded_events_until_eose() {
    let keys = Keys::generate();
    let other = Keys::generate();
    let seed = vec![peer_info_event(&keys, 1000), peer_info_event(&other, 1001)];
    let relay = spawn_relay(seed).await;
    let client = RelayClient::connect(&relay.url).await.unwrap();

    let found = client
        .query(
            Filter::new().authors([keys.public_key().to_string()]),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].pubkey, keys.public_key());
}

#[tokio::test]
async fn query_respects_limit() {
    let keys = Keys::generate();
    let seed = vec![
        peer_info_event(&keys, 1000),
        peer_info_event(&keys, 1001),
        peer_info_event(&keys, 1002),
    ];
    let relay = spawn_relay(seed).await;
    let client = RelayClient::connect(&relay.url).await.unwrap();

    let found = client
        .query(
            Filter::new().kinds([KIND_PEER_INFO]).limit(1),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn subscription_receives_live_events() {
    let relay = spawn_relay(Vec::new()).await;
    let subscriber = RelayClient::connect(&relay.url).await.unwrap();
    let publisher = RelayClient::connect(&relay.url).await.unwrap();

    let mut sub = subscriber
        .subscribe(Filter::new().kinds([KIND_PEER_INFO]))
        .await
        .unwrap();

    // Drain the EOSE for the empty store.
    let first = timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
    assert!(matches!(first, Some(SubscriptionMessage::EndOfStored)));

    let keys = Keys::generate();
    let event = peer_info_event(&keys, 2000);
    publisher.publish(&event).await.unwrap();

    let live = timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
    match live {
        Some(SubscriptionMessage::Event(received)) => assert_eq!(received, event),
        other => panic!("expected live event, got {other:?}"),
    }
}

#[tokio::test]
async fn query_times_out_without_eose() {
    let url = spawn_silent_relay().await;
    let client = RelayClient::connect(&url).await.unwrap();

    let started = std::time::Instant::now();
    let found = client
        .query(Filter::new().kinds([KIND_PEER_INFO]), Duration::from_millis(300))
        .await
        .unwrap();
    assert!(found.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn subscription_close_is_idempotent() {
    let relay = spawn_relay(Vec::new()).await;
    let client = RelayClient::connect(&relay.url).await.unwrap();

    let mut sub = client.subscribe(Filter::new()).await.unwrap();
    sub.close().await;
    sub.close().await;
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    // Bind a port, then drop the listener so the port is closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = RelayClient::connect(&format!("ws://{addr}")).await;
    assert!(matches!(err, Err(RelayError::ConnectFailed(_))));
}

#[tokio::test]
async fn concurrent_publishes_multiplex_over_one_socket() {
    let relay = spawn_relay(Vec::new()).await;
    let client = RelayClient::connect(&relay.url).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let keys = Keys::generate();
            let event = peer_info_event(&keys, 3000);
            client.publish(&event).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let found = client
        .query(Filter::new().kinds([KIND_PEER_INFO]), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(found.len(), 8);
}
