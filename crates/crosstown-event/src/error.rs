// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EventError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EventError {
    fn from(e: std::io::Error) -> Self {
        EventError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        EventError::Payload(e.to_string())
    }
}
