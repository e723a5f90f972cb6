// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service client.

use super::server::with_timeout;
use super::{parse_service_uri, RosService, ServiceType};
use crate::error::{Error, Result};
use crate::master::MasterClient;
use crate::message::RosMessage;
use crate::tcpros::{frame, keys, ConnectionHeader};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Byte-level client for one service name.
///
/// Every call looks the provider up again, so a restarted server is
/// picked up transparently.
#[derive(Clone)]
pub struct RawServiceClient {
    service: String,
    service_type: ServiceType,
    master: MasterClient,
    tcp_timeout: Duration,
}

impl RawServiceClient {
    pub(crate) fn new(
        service: String,
        service_type: ServiceType,
        master: MasterClient,
        tcp_timeout: Duration,
    ) -> Self {
        Self {
            service,
            service_type,
            master,
            tcp_timeout,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Override the bound applied to each socket operation.
    pub fn with_tcp_timeout(mut self, tcp_timeout: Duration) -> Self {
        self.tcp_timeout = tcp_timeout;
        self
    }

    /// Send a serialized request and return the serialized response.
    ///
    /// A handler-side failure is returned as [`Error::Service`].
    pub async fn call(&self, request: &[u8]) -> Result<Vec<u8>> {
        let uri = self.master.lookup_service(&self.service).await?;
        let (host, port) = parse_service_uri(&uri)
            .ok_or_else(|| Error::Protocol(format!("bad service URI: {}", uri)))?;
        debug!(service = %self.service, "Calling {}", uri);

        let limit = self.tcp_timeout;
        let mut stream = with_timeout(limit, TcpStream::connect((host.as_str(), port))).await??;

        let header = ConnectionHeader::new()
            .with(keys::CALLER_ID, self.master.caller_id())
            .with(keys::SERVICE, self.service.as_str())
            .with(keys::MD5SUM, self.service_type.md5sum())
            .with(keys::TYPE, self.service_type.name());
        with_timeout(limit, header.write_to(&mut stream)).await??;

        let reply = with_timeout(limit, ConnectionHeader::read_from(&mut stream)).await??;
        if let Some(reason) = reply.get(keys::ERROR) {
            return Err(Error::Service(reason.to_string()));
        }

        with_timeout(limit, frame::write_frame(&mut stream, request)).await??;

        let ok = with_timeout(limit, stream.read_u8()).await??;
        let body = with_timeout(limit, frame::read_frame(&mut stream))
            .await??
            .ok_or_else(|| Error::Protocol("service closed before responding".into()))?;

        if ok == 1 {
            Ok(body)
        } else {
            Err(Error::Service(String::from_utf8_lossy(&body).into_owned()))
        }
    }
}

/// Typed client for service `S`.
pub struct ServiceClient<S> {
    raw: RawServiceClient,
    _marker: PhantomData<fn(S)>,
}

impl<S> Clone for ServiceClient<S> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S: RosService> ServiceClient<S> {
    pub(crate) fn new(raw: RawServiceClient) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn service(&self) -> &str {
        self.raw.service()
    }

    pub fn with_tcp_timeout(self, tcp_timeout: Duration) -> Self {
        Self::new(self.raw.with_tcp_timeout(tcp_timeout))
    }

    pub async fn call(&self, request: &S::Request) -> Result<S::Response> {
        let body = self.raw.call(&request.to_bytes()).await?;
        S::Response::decode(&body)
    }

    pub fn raw(&self) -> &RawServiceClient {
        &self.raw
    }
}
