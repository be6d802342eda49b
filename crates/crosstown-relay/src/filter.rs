// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! NIP-01 subscription filters with the `#p` tag extension.

use serde::{Deserialize, Serialize};

use crosstown_event::Event;

/// Subscription filter. Absent members match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    /// Matches events carrying at least one `["p", v]` tag with `v` in the set.
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = String>) -> Self {
        self.authors = Some(authors.into_iter().collect());
        self
    }

    pub fn p_tag(mut self, pubkey: impl Into<String>) -> Self {
        self.p_tags.get_or_insert_with(Vec::new).push(pubkey.into());
        self
    }

    pub fn since(mut self, unix_seconds: i64) -> Self {
        self.since = Some(unix_seconds);
        self
    }

    pub fn until(mut self, unix_seconds: i64) -> Self {
        self.until = Some(unix_seconds);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Relay-side matching semantics; also used by in-process test relays.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(p_tags) = &self.p_tags {
            let tagged = event
                .tags
                .iter()
                .any(|t| t.len() >= 2 && t[0] == "p" && p_tags.contains(&t[1]));
            if !tagged {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        true
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crosstown_event::{EventDraft, Keys, KIND_PEER_INFO};

    fn event_with_p(keys: &Keys, p: &str, created_at: i64) -> Event {
        EventDraft::new(KIND_PEER_INFO, "{}")
            .to_pubkey(p)
            .created_at(created_at)
            .sign(keys)
            .unwrap()
    }

    #[test]
    fn serializes_p_filter_with_hash_key() {
        let filter = Filter::new().kinds([23194]).p_tag("ab".repeat(32));
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("\"#p\""));
        assert!(!json.contains("\"authors\""));
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn matches_by_kind_author_and_p_tag() {
        let keys = Keys::generate();
        let target = "cd".repeat(32);
        let event = event_with_p(&keys, &target, 1000);

        assert!(Filter::new().kinds([KIND_PEER_INFO]).matches(&event));
        assert!(!Filter::new().kinds([1]).matches(&event));
        assert!(Filter::new()
            .authors([keys.public_key().to_string()])
            .matches(&event));
        assert!(Filter::new().p_tag(target.clone()).matches(&event));
        assert!(!Filter::new().p_tag("ef".repeat(32)).matches(&event));
    }

    #[test]
    fn matches_time_window() {
        let keys = Keys::generate();
        let event = event_with_p(&keys, &"ab".repeat(32), 1000);
        assert!(Filter::new().since(1000).matches(&event));
        assert!(!Filter::new().since(1001).matches(&event));
        assert!(Filter::new().until(1000).matches(&event));
        assert!(!Filter::new().until(999).matches(&event));
    }
}
