// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML-RPC transport for the ROS master and slave APIs.
//!
//! Only the subset ROS uses is supported: scalar values, arrays and structs,
//! method calls, responses and faults. Payloads are parsed with `roxmltree`
//! and sent over HTTP with `reqwest`.
//!
//! ```text
//! <methodCall>
//!   <methodName>getPid</methodName>
//!   <params><param><value><string>/caller</string></value></param></params>
//! </methodCall>
//! ```

mod client;
pub mod codec;
mod value;

pub use client::XmlRpcClient;
pub use value::Value;

use thiserror::Error;

/// XML-RPC transport and codec errors.
#[derive(Debug, Error)]
pub enum XmlRpcError {
    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Body is not well-formed XML.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// Well-formed XML that is not a valid XML-RPC document.
    #[error("Malformed XML-RPC: {0}")]
    Malformed(String),

    /// The remote side answered with a `<fault>`.
    #[error("Fault {code}: {message}")]
    Fault { code: i32, message: String },
}
