// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Peer sources — genesis seeds, the optional remote registry, and
//! caller-supplied JSON, merged into one deduplicated, ordered peer set.
//!
//! Later sources override earlier ones by pubkey; the position of the first
//! insertion is kept so iteration order is stable across runs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::BootstrapError;

/// A peer we know about before any handshake: where to find its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownPeer {
    pub pubkey: String,
    pub relay_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilp_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btp_endpoint: Option<String>,
}

/// Built-in network entry points, used when no other source knows better.
pub fn genesis_peers() -> Vec<KnownPeer> {
    vec![
        KnownPeer {
            pubkey: "d91a71673e25d3011d14f8a7ff1e9b1c4eb6cbfb78cf2a1d9cdd6f33c8da0dd6".into(),
            relay_url: "wss://relay.crosstown.dev".into(),
            ilp_address: Some("g.crosstown.genesis0".into()),
            btp_endpoint: Some("wss://genesis0.crosstown.dev:7768".into()),
        },
        KnownPeer {
            pubkey: "3e7a9c5b0f14d2886ab41c7e9d35f08212c9e6744be00d5c9a8b16f2e4a7c913".into(),
            relay_url: "wss://relay.crosstown.dev".into(),
            ilp_address: Some("g.crosstown.genesis1".into()),
            btp_endpoint: Some("wss://genesis1.crosstown.dev:7768".into()),
        },
    ]
}

/// Registry wire entry; `relayUrl` may be absent when the registry assumes a
/// network-default relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryPeer {
    pubkey: String,
    #[serde(default)]
    relay_url: Option<String>,
    #[serde(default)]
    ilp_address: Option<String>,
    #[serde(default)]
    btp_endpoint: Option<String>,
}

/// Aggregates genesis, registry, and caller-supplied peers.
pub struct PeerSources {
    /// Include the built-in genesis peers. Disable for isolated networks.
    pub genesis_enabled: bool,
    /// Skip the registry fetch entirely when false.
    pub registry_enabled: bool,
    /// Registry endpoint returning a JSON array of peers. No URL, no fetch.
    pub registry_url: Option<String>,
    /// Fallback relay URL for registry entries that carry none.
    pub default_relay_url: Option<String>,
    http: reqwest::Client,
}

impl Default for PeerSources {
    fn default() -> Self {
        Self {
            genesis_enabled: true,
            registry_enabled: true,
            registry_url: None,
            default_relay_url: None,
            http: reqwest::Client::new(),
        }
    }
}

impl PeerSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the merged peer set: genesis, then registry (non-fatal on
    /// failure), then `extra` layers in order, later entries overriding.
    pub async fn load(&self, extra: Vec<Vec<KnownPeer>>) -> Vec<KnownPeer> {
        let mut layers = Vec::new();
        if self.genesis_enabled {
            layers.push(genesis_peers());
        }
        if self.registry_enabled {
            if let Some(url) = &self.registry_url {
                match self.fetch_registry(url).await {
                    Ok(peers) => {
                        debug!(count = peers.len(), "registry peers fetched");
                        layers.push(peers);
                    }
                    // The network is reachable through genesis peers anyway.
                    Err(e) => warn!(%url, error = %e, "registry fetch failed, continuing"),
                }
            }
        }
        layers.extend(extra);
        merge_peers(layers)
    }

    async fn fetch_registry(&self, url: &str) -> Result<Vec<KnownPeer>, BootstrapError> {
        let entries: Vec<RegistryPeer> = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BootstrapError::Registry(e.to_string()))?
            .json()
            .await
            .map_err(|e| BootstrapError::Registry(e.to_string()))?;

        let mut peers = Vec::new();
        for entry in entries {
            let relay_url = entry
                .relay_url
                .or_else(|| self.default_relay_url.clone());
            let Some(relay_url) = relay_url else {
                warn!(pubkey = %entry.pubkey, "registry peer has no relay url, skipped");
                continue;
            };
            peers.push(KnownPeer {
                pubkey: entry.pubkey,
                relay_url,
                ilp_address: entry.ilp_address,
                btp_endpoint: entry.btp_endpoint,
            });
        }
        Ok(peers)
    }
}

/// Parse a caller-supplied JSON array of peers.
pub fn parse_known_peers(json: &str) -> Result<Vec<KnownPeer>, BootstrapError> {
    serde_json::from_str(json).map_err(|e| BootstrapError::InvalidPeerJson(e.to_string()))
}

/// Merge layers, deduplicating by pubkey. Later layers override earlier ones;
/// the first insertion fixes the position.
pub fn merge_peers(layers: Vec<Vec<KnownPeer>>) -> Vec<KnownPeer> {
    let mut order: Vec<String> = Vec::new();
    let mut by_pubkey: HashMap<String, KnownPeer> = HashMap::new();
    for layer in layers {
        for peer in layer {
            if !by_pubkey.contains_key(&peer.pubkey) {
                order.push(peer.pubkey.clone());
            }
            by_pubkey.insert(peer.pubkey.clone(), peer);
        }
    }
    order
        .into_iter()
        .filter_map(|pubkey| by_pubkey.remove(&pubkey))
        .collect()
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(pubkey: &str, relay: &str) -> KnownPeer {
        KnownPeer {
            pubkey: pubkey.into(),
            relay_url: relay.into(),
            ilp_address: None,
            btp_endpoint: None,
        }
    }

    #[test]
    fn merge_deduplicates_and_keeps_first_position() {
        let a = peer(&"aa".repeat(32), "ws://one");
        let b = peer(&"bb".repeat(32), "ws://two");
        let a_override = peer(&"aa".repeat(32), "ws://three");

        let merged = merge_peers(vec![vec![a, b.clone()], vec![a_override.clone()]]);
        assert_eq!(merged.len(), 2);
        // First-insertion position, later-source value.
        assert_eq!(merged[0], a_override);
        assert_eq!(merged[1], b);
    }

    #[test]
    fn merge_keeps_every_pubkey_from_both_lists() {
        let l1: Vec<KnownPeer> = (0..5)
            .map(|i| peer(&format!("{i:064x}"), "ws://l1"))
            .collect();
        let l2: Vec<KnownPeer> = (3..8)
            .map(|i| peer(&format!("{i:064x}"), "ws://l2"))
            .collect();

        let merged = merge_peers(vec![l1.clone(), l2.clone()]);
        assert_eq!(merged.len(), 8);
        for source in l1.iter().chain(l2.iter()) {
            assert!(merged.iter().any(|p| p.pubkey == source.pubkey));
        }
        // No duplicates.
        let mut pubkeys: Vec<&str> = merged.iter().map(|p| p.pubkey.as_str()).collect();
        pubkeys.dedup();
        assert_eq!(pubkeys.len(), 8);
    }

    #[test]
    fn parse_known_peers_accepts_camel_case() {
        let json = format!(
            r#"[{{"pubkey":"{}","relayUrl":"ws://r","ilpAddress":"g.x","btpEndpoint":"ws://p"}}]"#,
            "cc".repeat(32)
        );
        let peers = parse_known_peers(&json).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].relay_url, "ws://r");
        assert_eq!(peers[0].ilp_address.as_deref(), Some("g.x"));
    }

    #[test]
    fn parse_known_peers_rejects_garbage() {
        assert!(parse_known_peers("not json").is_err());
    }

    #[tokio::test]
    async fn load_without_registry_yields_genesis_plus_extra() {
        let sources = PeerSources {
            registry_enabled: false,
            ..PeerSources::new()
        };
        let extra = peer(&"dd".repeat(32), "ws://extra");
        let peers = sources.load(vec![vec![extra.clone()]]).await;
        assert_eq!(peers.len(), genesis_peers().len() + 1);
        assert_eq!(peers.last(), Some(&extra));
    }

    #[tokio::test]
    async fn registry_failure_is_non_fatal() {
        let sources = PeerSources {
            registry_url: Some("http://127.0.0.1:9/unreachable".into()),
            ..PeerSources::new()
        };
        let peers = sources.load(Vec::new()).await;
        assert_eq!(peers.len(), genesis_peers().len());
    }
}
