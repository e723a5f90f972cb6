// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One subscriber connection on the publishing side.
//!
//! ```text
//! Handshaking --(type/md5 match, reply sent)--> Streaming --> Closed
//!      |                                                        ^
//!      +-------------------(mismatch / I/O error)---------------+
//! ```
//!
//! While streaming, a timer drains at most one queued payload per tick. A
//! write that misses its deadline keeps its cursor and resumes on the next
//! tick.

use crate::tcpros::frame::PendingFrame;
use crate::tcpros::{keys, ConnectionHeader, HeaderError, OutboundQueue};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

pub(crate) type SessionId = u64;

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Header(#[from] HeaderError),

    #[error("subscriber wants {got_type} ({got_md5}), topic carries {expected_type} ({expected_md5})")]
    TypeMismatch {
        expected_type: String,
        expected_md5: String,
        got_type: String,
        got_md5: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Lifecycle notifications sent to the publisher control task.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Established {
        id: SessionId,
        caller_id: String,
    },
    Closed {
        id: SessionId,
        result: Result<(), SessionError>,
    },
}

/// Fixed parameters of a session, copied from its publisher.
#[derive(Debug, Clone)]
pub(crate) struct SessionParams {
    pub topic: String,
    pub type_name: String,
    pub md5sum: String,
    pub flush_interval: Duration,
    pub write_deadline: Duration,
}

/// Drive one accepted connection until quit, peer close or error.
pub(crate) async fn run(
    id: SessionId,
    mut stream: TcpStream,
    params: &SessionParams,
    queue: &OutboundQueue,
    mut quit: oneshot::Receiver<()>,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    let header = tokio::select! {
        _ = &mut quit => return Ok(()),
        header = ConnectionHeader::read_from(&mut stream) => header?,
    };

    let got_type = header.require(keys::TYPE)?;
    let got_md5 = header.require(keys::MD5SUM)?;
    if got_type != params.type_name || got_md5 != params.md5sum {
        return Err(SessionError::TypeMismatch {
            expected_type: params.type_name.clone(),
            expected_md5: params.md5sum.clone(),
            got_type: got_type.to_string(),
            got_md5: got_md5.to_string(),
        });
    }

    if header.get(keys::TCP_NODELAY) == Some("1") {
        stream.set_nodelay(true)?;
    }

    ConnectionHeader::new()
        .with(keys::MD5SUM, params.md5sum.as_str())
        .with(keys::TYPE, params.type_name.as_str())
        .write_to(&mut stream)
        .await?;

    let caller_id = header.get(keys::CALLER_ID).unwrap_or_default().to_string();
    debug!(topic = %params.topic, session = id, "Subscriber {} connected", caller_id);
    // The control task may already be tearing down; it then ignores us.
    let _ = events
        .send(SessionEvent::Established { id, caller_id })
        .await;

    stream_payloads(stream, params, queue, quit).await
}

async fn stream_payloads(
    mut stream: TcpStream,
    params: &SessionParams,
    queue: &OutboundQueue,
    mut quit: oneshot::Receiver<()>,
) -> Result<(), SessionError> {
    let (mut reader, mut writer) = stream.split();
    let mut ticker = tokio::time::interval(params.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending: Option<PendingFrame> = None;
    let mut scratch = [0u8; 256];

    loop {
        tokio::select! {
            _ = &mut quit => return Ok(()),
            read = reader.read(&mut scratch) => match read? {
                0 => {
                    debug!(topic = %params.topic, "Subscriber closed the connection");
                    return Ok(());
                }
                // Subscribers send nothing after the handshake.
                _ => {}
            },
            _ = ticker.tick() => {
                if pending.is_none() {
                    pending = queue.pop().map(PendingFrame::new);
                }
                if let Some(frame) = pending.as_mut() {
                    if frame.flush_with_deadline(&mut writer, params.write_deadline).await? {
                        pending = None;
                    } else {
                        trace!(topic = %params.topic, "Write deadline expired, resuming next tick");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcpros::frame::read_frame;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn params() -> SessionParams {
        SessionParams {
            topic: "/chatter".into(),
            type_name: "std_msgs/String".into(),
            md5sum: "992ce8a1687cec8c8bd883ec73ca41d1".into(),
            flush_interval: Duration::from_millis(10),
            write_deadline: Duration::from_millis(10),
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let (accepted, client) = tokio::join!(listener.accept(), client);
        (accepted.unwrap().0, client.unwrap())
    }

    #[tokio::test]
    async fn test_mismatch_sends_nothing() {
        let (server, mut client) = connected_pair().await;
        let queue = OutboundQueue::new(10);
        let (_quit_tx, quit_rx) = oneshot::channel();
        let (events_tx, mut events_rx) = mpsc::channel(4);

        ConnectionHeader::new()
            .with("callerid", "/listener")
            .with("type", "std_msgs/String")
            .with("md5sum", "0000")
            .write_to(&mut client)
            .await
            .unwrap();

        let result = run(1, server, &params(), &queue, quit_rx, &events_tx).await;
        assert!(matches!(result, Err(SessionError::TypeMismatch { .. })));
        assert!(events_rx.try_recv().is_err());

        // Server side dropped without writing a byte.
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_handshake_then_frames_in_order() {
        let (server, mut client) = connected_pair().await;
        let queue = Arc::new(OutboundQueue::new(10));
        let (quit_tx, quit_rx) = oneshot::channel();
        let (events_tx, mut events_rx) = mpsc::channel(4);

        let session_queue = Arc::clone(&queue);
        let session = tokio::spawn(async move {
            run(7, server, &params(), &session_queue, quit_rx, &events_tx).await
        });

        ConnectionHeader::new()
            .with("callerid", "/listener")
            .with("topic", "/chatter")
            .with("type", "std_msgs/String")
            .with("md5sum", "992ce8a1687cec8c8bd883ec73ca41d1")
            .write_to(&mut client)
            .await
            .unwrap();

        let reply = ConnectionHeader::read_from(&mut client).await.unwrap();
        let fields: Vec<_> = reply.fields().collect();
        assert_eq!(
            fields,
            [
                ("md5sum", "992ce8a1687cec8c8bd883ec73ca41d1"),
                ("type", "std_msgs/String")
            ]
        );

        match events_rx.recv().await {
            Some(SessionEvent::Established { id, caller_id }) => {
                assert_eq!(id, 7);
                assert_eq!(caller_id, "/listener");
            }
            other => panic!("unexpected event {:?}", other),
        }

        queue.push(Arc::from(&b"first"[..]));
        queue.push(Arc::from(&b"second"[..]));
        assert_eq!(read_frame(&mut client).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut client).await.unwrap().unwrap(), b"second");

        quit_tx.send(()).unwrap();
        assert!(session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_missing_md5_is_header_error() {
        let (server, mut client) = connected_pair().await;
        let queue = OutboundQueue::new(10);
        let (_quit_tx, quit_rx) = oneshot::channel();
        let (events_tx, _events_rx) = mpsc::channel(4);

        ConnectionHeader::new()
            .with("type", "std_msgs/String")
            .write_to(&mut client)
            .await
            .unwrap();

        let result = run(1, server, &params(), &queue, quit_rx, &events_tx).await;
        assert!(matches!(
            result,
            Err(SessionError::Header(HeaderError::MissingField(_)))
        ));
    }

    #[tokio::test]
    async fn test_peer_close_ends_session_cleanly() {
        let (server, mut client) = connected_pair().await;
        let queue = OutboundQueue::new(10);
        let (_quit_tx, quit_rx) = oneshot::channel();
        let (events_tx, _events_rx) = mpsc::channel(4);

        ConnectionHeader::new()
            .with("type", "std_msgs/String")
            .with("md5sum", "992ce8a1687cec8c8bd883ec73ca41d1")
            .write_to(&mut client)
            .await
            .unwrap();

        let reader = tokio::spawn(async move {
            let _ = ConnectionHeader::read_from(&mut client).await;
            drop(client);
        });

        let result = run(1, server, &params(), &queue, quit_rx, &events_tx).await;
        reader.await.unwrap();
        assert!(result.is_ok());
    }
}
