// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket relay client.
//!
//! # Design
//!
//! ```text
//!   publish() ──┐
//!   subscribe()─┼──► mpsc::Sender<Command> ──► socket task ◄──► WebSocket
//!   query()   ──┘                                  │
//!                                                  ├─► per-subscription mpsc
//!   Subscription::recv() ◄─────────────────────────┘
//! ```
//!
//! One socket task owns the WebSocket; cloned [`RelayClient`] handles
//! multiplex any number of publishes and subscriptions over it. The task
//! processes commands and inbound frames in a single `select!` loop, so
//! subscription state never needs a lock.
//!
//! Inbound frames that fail to parse are logged and dropped — a misbehaving
//! relay can never abort the socket task.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crosstown_event::Event;

use crate::error::RelayError;
use crate::filter::Filter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tunables for a relay connection.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// How long to wait for the relay's `["OK", …]` before treating a publish
    /// as accepted anyway (many relays never ack).
    pub ack_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Messages delivered on a subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    Event(Event),
    /// The relay finished replaying stored events (`EOSE`).
    EndOfStored,
}

enum Command {
    Publish {
        event: Box<Event>,
        ack: oneshot::Sender<Result<(), PublishError>>,
    },
    Subscribe {
        filter: Box<Filter>,
        tx: mpsc::Sender<SubscriptionMessage>,
        ready: oneshot::Sender<Result<String, String>>,
    },
    CloseSub {
        sub_id: String,
    },
    Shutdown,
}

/// Internal publish outcome — distinguishes retryable transport failures from
/// an explicit relay rejection.
enum PublishError {
    Transport(String),
    Rejected(String),
}

/// Cheap-to-clone handle to one relay connection.
#[derive(Clone)]
pub struct RelayClient {
    url: String,
    ack_timeout: Duration,
    cmd_tx: mpsc::Sender<Command>,
}

impl RelayClient {
    /// Connect with default options.
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        Self::connect_with(url, RelayOptions::default()).await
    }

    pub async fn connect_with(url: &str, options: RelayOptions) -> Result<Self, RelayError> {
        let connected = tokio::time::timeout(options.connect_timeout, connect_async(url))
            .await
            .map_err(|_| RelayError::ConnectFailed(format!("{url}: connect timed out")))?;
        let (ws, _) = connected.map_err(|e| RelayError::ConnectFailed(format!("{url}: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(socket_task(ws, cmd_rx, url.to_string()));
        info!(%url, "relay connected");

        Ok(Self {
            url: url.to_string(),
            ack_timeout: options.ack_timeout,
            cmd_tx,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Publish an event, resolving on relay acknowledgment or after the ack
    /// timeout. Transport failures are retried once before surfacing.
    pub async fn publish(&self, event: &Event) -> Result<(), RelayError> {
        match self.publish_once(event).await {
            Err(RetryablePublish::Transport(reason)) => {
                debug!(url = %self.url, %reason, "publish transport error, retrying once");
                match self.publish_once(event).await {
                    Ok(()) => Ok(()),
                    Err(RetryablePublish::Transport(reason))
                    | Err(RetryablePublish::Rejected(reason)) => {
                        Err(RelayError::PublishFailed(reason))
                    }
                }
            }
            Err(RetryablePublish::Rejected(reason)) => Err(RelayError::PublishFailed(reason)),
            Ok(()) => Ok(()),
        }
    }

    async fn publish_once(&self, event: &Event) -> Result<(), RetryablePublish> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Publish {
                event: Box::new(event.clone()),
                ack: ack_tx,
            })
            .await
            .map_err(|_| RetryablePublish::Transport("connection closed".into()))?;

        match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            // No ack within the window: the relay most likely just does not
            // send OK frames; the event went out on the wire.
            Err(_) => Ok(()),
            Ok(Err(_)) => Err(RetryablePublish::Transport("connection closed".into())),
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(PublishError::Transport(reason)))) => {
                Err(RetryablePublish::Transport(reason))
            }
            Ok(Ok(Err(PublishError::Rejected(reason)))) => Err(RetryablePublish::Rejected(reason)),
        }
    }

    /// Open a subscription for `filter`.
    pub async fn subscribe(&self, filter: Filter) -> Result<Subscription, RelayError> {
        let (tx, rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe {
                filter: Box::new(filter),
                tx,
                ready: ready_tx,
            })
            .await
            .map_err(|_| RelayError::SubscribeFailed("connection closed".into()))?;

        let sub_id = ready_rx
            .await
            .map_err(|_| RelayError::SubscribeFailed("connection closed".into()))?
            .map_err(RelayError::SubscribeFailed)?;

        Ok(Subscription {
            id: sub_id,
            rx,
            cmd_tx: self.cmd_tx.clone(),
            closed: false,
        })
    }

    /// Collect stored events matching `filter` until `EOSE` or `timeout`.
    pub async fn query(&self, filter: Filter, timeout: Duration) -> Result<Vec<Event>, RelayError> {
        let mut sub = self.subscribe(filter).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, sub.recv()).await {
                Ok(Some(SubscriptionMessage::Event(event))) => events.push(event),
                Ok(Some(SubscriptionMessage::EndOfStored)) | Ok(None) => break,
                Err(_) => {
                    debug!(url = %self.url, "query timed out before EOSE");
                    break;
                }
            }
        }
        sub.close().await;
        Ok(events)
    }

    /// Close the connection. Outstanding subscriptions end their streams.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

/// A live subscription. Dropping it closes the relay-side subscription.
pub struct Subscription {
    id: String,
    rx: mpsc::Receiver<SubscriptionMessage>,
    cmd_tx: mpsc::Sender<Command>,
    closed: bool,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next message; `None` once the subscription is closed or the connection
    /// is gone.
    pub async fn recv(&mut self) -> Option<SubscriptionMessage> {
        self.rx.recv().await
    }

    /// Idempotent close; sends `["CLOSE", id]` on first call.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();
        let _ = self
            .cmd_tx
            .send(Command::CloseSub {
                sub_id: self.id.clone(),
            })
            .await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.cmd_tx.try_send(Command::CloseSub {
                sub_id: self.id.clone(),
            });
        }
    }
}

enum RetryablePublish {
    Transport(String),
    Rejected(String),
}

// ── Socket task ───────────────────────────────────────────────────────────────

async fn socket_task(mut ws: WsStream, mut cmd_rx: mpsc::Receiver<Command>, url: String) {
    let mut subs: HashMap<String, mpsc::Sender<SubscriptionMessage>> = HashMap::new();
    let mut pending_acks: HashMap<String, oneshot::Sender<Result<(), PublishError>>> =
        HashMap::new();
    let mut next_sub: u64 = 0;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Publish { event, ack }) => {
                    let id = event.id.clone();
                    let frame = json!(["EVENT", *event]).to_string();
                    match ws.send(Message::Text(frame)).await {
                        Ok(()) => {
                            pending_acks.insert(id, ack);
                        }
                        Err(e) => {
                            let _ = ack.send(Err(PublishError::Transport(e.to_string())));
                        }
                    }
                }
                Some(Command::Subscribe { filter, tx, ready }) => {
                    next_sub += 1;
                    let sub_id = format!("sub{next_sub}");
                    let frame = json!(["REQ", sub_id, *filter]).to_string();
                    match ws.send(Message::Text(frame)).await {
                        Ok(()) => {
                            subs.insert(sub_id.clone(), tx);
                            let _ = ready.send(Ok(sub_id));
                        }
                        Err(e) => {
                            let _ = ready.send(Err(e.to_string()));
                        }
                    }
                }
                Some(Command::CloseSub { sub_id }) => {
                    if subs.remove(&sub_id).is_some() {
                        let _ = ws.send(Message::Text(json!(["CLOSE", sub_id]).to_string())).await;
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&url, &text, &mut subs, &mut pending_acks);
                }
                Some(Ok(Message::Ping(data))) => {
                    if ws.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary frames ignored
                Some(Err(e)) => {
                    debug!(%url, "websocket error: {e}");
                    break;
                }
            },
        }
    }

    debug!(%url, "relay socket task stopped");
    let _ = ws.close(None).await;
    // Dropping subs ends every Subscription stream; dropping pending acks
    // surfaces transport errors to waiting publishers.
}

fn handle_frame(
    url: &str,
    text: &str,
    subs: &mut HashMap<String, mpsc::Sender<SubscriptionMessage>>,
    pending_acks: &mut HashMap<String, oneshot::Sender<Result<(), PublishError>>>,
) {
    let Ok(frame) = serde_json::from_str::<Vec<Value>>(text) else {
        debug!(%url, "unparseable relay frame dropped");
        return;
    };
    match frame.first().and_then(Value::as_str) {
        Some("EVENT") if frame.len() >= 3 => {
            let Some(sub_id) = frame[1].as_str() else { return };
            let Ok(event) = serde_json::from_value::<Event>(frame[2].clone()) else {
                debug!(%url, "malformed event in frame dropped");
                return;
            };
            forward(subs, sub_id, SubscriptionMessage::Event(event));
        }
        Some("EOSE") if frame.len() >= 2 => {
            if let Some(sub_id) = frame[1].as_str() {
                forward(subs, sub_id, SubscriptionMessage::EndOfStored);
            }
        }
        Some("OK") if frame.len() >= 3 => {
            let Some(event_id) = frame[1].as_str() else { return };
            let accepted = frame[2].as_bool().unwrap_or(false);
            if let Some(ack) = pending_acks.remove(event_id) {
                let result = if accepted {
                    Ok(())
                } else {
                    let reason = frame
                        .get(3)
                        .and_then(Value::as_str)
                        .unwrap_or("rejected by relay")
                        .to_string();
                    Err(PublishError::Rejected(reason))
                };
                let _ = ack.send(result);
            }
        }
        Some("NOTICE") => {
            let msg = frame.get(1).and_then(Value::as_str).unwrap_or("");
            info!(%url, notice = %msg, "relay notice");
        }
        _ => debug!(%url, "unknown relay frame dropped"),
    }
}

fn forward(
    subs: &mut HashMap<String, mpsc::Sender<SubscriptionMessage>>,
    sub_id: &str,
    msg: SubscriptionMessage,
) {
    let Some(tx) = subs.get(sub_id) else { return };
    match tx.try_send(msg) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%sub_id, "subscription consumer lagging, message dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            subs.remove(sub_id);
        }
    }
}
