// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP client for XML-RPC calls.

use super::{codec, Value, XmlRpcError};
use std::time::Duration;
use tracing::trace;

/// Thin XML-RPC client over a shared `reqwest` connection pool.
#[derive(Clone)]
pub struct XmlRpcClient {
    http: reqwest::Client,
}

impl XmlRpcClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, XmlRpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| XmlRpcError::Http(e.to_string()))?;
        Ok(Self { http })
    }

    /// Invoke `method` on the XML-RPC server at `uri`.
    pub async fn call(
        &self,
        uri: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, XmlRpcError> {
        let body = codec::encode_call(method, &params);
        trace!("XML-RPC {} -> {}", method, uri);

        let response = self
            .http
            .post(uri)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| XmlRpcError::Http(format!("{} {}: {}", method, uri, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(XmlRpcError::Http(format!(
                "{} {}: HTTP {}",
                method, uri, status
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| XmlRpcError::Http(e.to_string()))?;
        codec::parse_response(&text)
    }
}
