// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound connection to one publisher.
//!
//! `requestTopic` on the publisher's slave API yields a TCPROS endpoint; we
//! connect, send our header first, check the reply, then forward every frame
//! to the node job queue.

use super::CallbackList;
use crate::error::{Error, Result};
use crate::master;
use crate::message::MessageEvent;
use crate::node::jobs::JobSender;
use crate::tcpros::{frame, keys, ConnectionHeader, ANY_MD5, PROTOCOL_NAME};
use crate::xmlrpc::{Value, XmlRpcClient};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub(crate) type LinkId = u64;

#[derive(Debug)]
pub(crate) enum LinkEvent {
    Connected { id: LinkId },
    Closed { id: LinkId, result: Result<()> },
}

/// Parameters shared by every link of one subscriber.
pub(crate) struct LinkParams {
    pub topic: String,
    pub caller_id: String,
    pub type_name: String,
    pub md5sum: String,
    pub definition: String,
    pub rpc: XmlRpcClient,
    pub jobs: JobSender,
    pub callbacks: CallbackList,
}

/// Run one link until quit, publisher close or error.
pub(crate) async fn run(
    id: LinkId,
    uri: &str,
    params: &LinkParams,
    mut quit: oneshot::Receiver<()>,
    events: &mpsc::Sender<LinkEvent>,
) -> Result<()> {
    let (header, mut stream) = tokio::select! {
        _ = &mut quit => return Ok(()),
        connected = connect(uri, params) => connected?,
    };

    let _ = events.send(LinkEvent::Connected { id }).await;

    let publisher_name = header
        .get(keys::CALLER_ID)
        .map(str::to_string)
        .unwrap_or_else(|| uri.to_string());
    let header = Arc::new(header);

    loop {
        let frame = tokio::select! {
            _ = &mut quit => return Ok(()),
            frame = frame::read_frame(&mut stream) => frame?,
        };
        let Some(payload) = frame else {
            debug!(topic = %params.topic, "Publisher {} closed the connection", uri);
            return Ok(());
        };

        let event = MessageEvent {
            publisher_name: publisher_name.clone(),
            receipt_time: SystemTime::now(),
            connection_header: ConnectionHeader::clone(&header),
        };
        let callbacks = Arc::clone(&params.callbacks);
        let job = Box::new(move || {
            let listeners: Vec<_> = callbacks.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
            for callback in listeners {
                callback(&payload, &event);
            }
        });

        tokio::select! {
            _ = &mut quit => return Ok(()),
            sent = params.jobs.send(job) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn connect(uri: &str, params: &LinkParams) -> Result<(ConnectionHeader, TcpStream)> {
    let protocols = Value::Array(vec![Value::Array(vec![Value::from(PROTOCOL_NAME)])]);
    let reply = master::call_api(
        &params.rpc,
        uri,
        "requestTopic",
        vec![
            Value::from(&params.caller_id),
            Value::from(&params.topic),
            protocols,
        ],
    )
    .await?;
    let (host, port) = tcpros_endpoint(&reply)?;

    debug!(topic = %params.topic, "Connecting to {}:{}", host, port);
    let mut stream = TcpStream::connect((host.as_str(), port)).await?;
    stream.set_nodelay(true)?;

    let mut request = ConnectionHeader::new()
        .with(keys::CALLER_ID, params.caller_id.as_str())
        .with(keys::TOPIC, params.topic.as_str())
        .with(keys::MD5SUM, params.md5sum.as_str())
        .with(keys::TYPE, params.type_name.as_str());
    if !params.definition.is_empty() {
        request.insert(keys::MESSAGE_DEFINITION, params.definition.as_str());
    }
    request.insert(keys::TCP_NODELAY, "1");
    request.write_to(&mut stream).await?;

    let reply = ConnectionHeader::read_from(&mut stream).await?;
    if let Some(reason) = reply.get(keys::ERROR) {
        return Err(Error::Protocol(format!("publisher {} refused: {}", uri, reason)));
    }
    check_type(&reply, params)?;
    Ok((reply, stream))
}

/// Extract `(host, port)` from a `["TCPROS", host, port]` protocol reply.
pub(crate) fn tcpros_endpoint(reply: &Value) -> Result<(String, u16)> {
    let malformed = || Error::Protocol(format!("unusable requestTopic reply: {:?}", reply));
    let items = reply.as_array().ok_or_else(malformed)?;
    match items {
        [protocol, host, port, ..] if protocol.as_str() == Some(PROTOCOL_NAME) => {
            let host = host.as_str().ok_or_else(malformed)?.to_string();
            let port = port
                .as_i32()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(malformed)?;
            Ok((host, port))
        }
        _ => Err(malformed()),
    }
}

fn check_type(reply: &ConnectionHeader, params: &LinkParams) -> Result<()> {
    let got_type = reply.require(keys::TYPE)?;
    let got_md5 = reply.require(keys::MD5SUM)?;
    let type_ok = params.type_name == "*" || got_type == params.type_name;
    let md5_ok = params.md5sum == ANY_MD5 || got_md5 == params.md5sum;
    if type_ok && md5_ok {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "publisher sends {} ({}), expected {} ({})",
            got_type, got_md5, params.type_name, params.md5sum
        )))
    }
}
