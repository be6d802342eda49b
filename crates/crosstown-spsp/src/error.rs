// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use crosstown_event::EventError;
use crosstown_toon::ToonDecodeError;

#[derive(Debug, Error)]
pub enum SpspError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Explicit REJECT from the remote. Never retried.
    #[error("SPSP request rejected: {code} {message}")]
    Rejected { code: String, message: String },

    /// No fulfillment after the single permitted retry.
    #[error("SPSP request timed out: {0}")]
    Timeout(String),

    #[error("channel open failed: {0}")]
    ChannelOpenFailed(String),

    #[error("channel did not reach open before the deadline")]
    ChannelOpenTimeout,

    #[error("missing capability: {0}")]
    Unconfigured(&'static str),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("malformed response: {0}")]
    BadResponse(String),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Toon(#[from] ToonDecodeError),
}
