// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RelayError {
    #[error("relay connect failed: {0}")]
    ConnectFailed(String),

    #[error("relay publish failed: {0}")]
    PublishFailed(String),

    #[error("relay subscribe failed: {0}")]
    SubscribeFailed(String),
}
