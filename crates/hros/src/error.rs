// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use crate::tcpros::HeaderError;
use crate::xmlrpc::XmlRpcError;
use thiserror::Error;

/// Result type for hros operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the node API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML-RPC error: {0}")]
    Rpc(#[from] XmlRpcError),

    /// The master (or a peer slave API) answered with a non-success status.
    #[error("{method} failed with status {code}: {message}")]
    Master {
        method: String,
        code: i32,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Service call failed: {0}")]
    Service(String),

    /// The node or entity was already shut down.
    #[error("{0} is shut down")]
    Shutdown(String),
}

impl From<HeaderError> for Error {
    fn from(e: HeaderError) -> Self {
        Self::Protocol(e.to_string())
    }
}
