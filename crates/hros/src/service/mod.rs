// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROS services: request/reply over TCPROS.
//!
//! ```text
//! client                         server
//!   | -- header {callerid, service, md5sum} --> |
//!   | <-- header {callerid, md5sum, type} ----- |   (or {error})
//!   | -- frame(request) ----------------------> |
//!   | <-- ok byte + frame(response | error) --- |
//! ```
//!
//! Servers keep the connection open while the client sent `persistent=1`.

mod client;
mod server;

pub use client::{RawServiceClient, ServiceClient};
pub use server::{RawServiceHandler, ServiceServer};

pub(crate) use server::ServerEnv;

use crate::message::{hex_md5, normalize_definition, RosMessage};

/// Name and md5 hash of a service type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType {
    name: String,
    md5sum: String,
}

impl ServiceType {
    pub fn new(name: impl Into<String>, md5sum: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            md5sum: md5sum.into(),
        }
    }

    /// Hash of the request text followed by the response text, both
    /// normalized. Built-in field types only.
    pub fn from_definitions(name: impl Into<String>, request: &str, response: &str) -> Self {
        let mut text = normalize_definition(request);
        text.push_str(&normalize_definition(response));
        Self {
            name: name.into(),
            md5sum: hex_md5(text.as_bytes()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn md5sum(&self) -> &str {
        &self.md5sum
    }
}

/// A service type with typed request and response messages.
pub trait RosService: Send + Sync + 'static {
    type Request: RosMessage;
    type Response: RosMessage;

    fn service_type() -> ServiceType;
}

/// Split a `rosrpc://host:port` URI.
pub(crate) fn parse_service_uri(uri: &str) -> Option<(String, u16)> {
    let rest = uri.strip_prefix("rosrpc://")?;
    let rest = rest.trim_end_matches('/');
    let (host, port) = rest.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}
