// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service server: listener, per-connection tasks, handler dispatch through
//! the node job queue.

use super::ServiceType;
use crate::error::{Error, Result};
use crate::master::MasterClient;
use crate::node::jobs::JobSender;
use crate::node::registry::Registry;
use crate::tcpros::{self, frame, keys, ConnectionHeader, ANY_MD5};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Byte-level handler: serialized request in, serialized response or an
/// error message out.
pub type RawServiceHandler =
    Arc<dyn Fn(&[u8]) -> std::result::Result<Vec<u8>, String> + Send + Sync>;

pub(crate) struct ServerEnv {
    pub caller_id: String,
    pub hostname: String,
    pub listen_ip: IpAddr,
    pub tcp_timeout: Duration,
    pub master: MasterClient,
    pub jobs: JobSender,
    pub registry: Weak<Registry<ServiceServer>>,
}

struct ConnectionContext {
    service: String,
    caller_id: String,
    service_type: ServiceType,
    handler: RawServiceHandler,
    jobs: JobSender,
    tcp_timeout: Duration,
}

/// A running service provider.
pub struct ServiceServer {
    service: String,
    service_type: ServiceType,
    service_uri: String,
    master: MasterClient,
    quit: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    registry: Weak<Registry<ServiceServer>>,
    shut_down: AtomicBool,
}

impl ServiceServer {
    /// Bind, register `rosrpc://host:port` with the master, start serving.
    pub(crate) async fn start(
        service: String,
        service_type: ServiceType,
        handler: RawServiceHandler,
        env: ServerEnv,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let listener = tcpros::bind_listener(env.listen_ip)?;
        let local_addr = listener.local_addr()?;
        let service_uri = format!("rosrpc://{}:{}", env.hostname, local_addr.port());

        env.master.register_service(&service, &service_uri).await?;
        info!(service = %service, "Serving at {}", service_uri);

        let (quit_tx, quit_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let context = Arc::new(ConnectionContext {
            service: service.clone(),
            caller_id: env.caller_id,
            service_type: service_type.clone(),
            handler,
            jobs: env.jobs,
            tcp_timeout: env.tcp_timeout,
        });

        let task = tokio::spawn(async move {
            accept_loop(listener, context, quit_rx).await;
            let _ = done_tx.send(true);
        });

        let server = Arc::new(Self {
            service,
            service_type,
            service_uri,
            master: env.master,
            quit: quit_tx,
            done: done_rx,
            registry: env.registry,
            shut_down: AtomicBool::new(false),
        });
        Ok((server, task))
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// `rosrpc://host:port` registered with the master.
    pub fn uri(&self) -> &str {
        &self.service_uri
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Unregister, stop accepting, close every connection. Only the first
    /// call has an effect.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(&self.service, self).await;
        }
        if let Err(e) = self
            .master
            .unregister_service(&self.service, &self.service_uri)
            .await
        {
            warn!(service = %self.service, "unregisterService failed: {}", e);
        }
        self.quit.send_replace(true);
        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
        debug!(service = %self.service, "Service server shut down");
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    mut quit: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = stopped(&mut quit) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let context = Arc::clone(&context);
                    let quit = quit.clone();
                    connections.spawn(async move {
                        if let Err(e) = serve(stream, peer, &context, quit).await {
                            debug!(service = %context.service, "Connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!(service = %context.service, "Accept failed: {}", e);
                    break;
                }
            },
            // Reap finished connections as we go.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: &ConnectionContext,
    mut quit: watch::Receiver<bool>,
) -> Result<()> {
    let limit = context.tcp_timeout;
    let header = tokio::select! {
        _ = stopped(&mut quit) => return Ok(()),
        header = with_timeout(limit, ConnectionHeader::read_from(&mut stream)) => header??,
    };

    let md5 = header.get(keys::MD5SUM).unwrap_or_default();
    if md5 != context.service_type.md5sum() && md5 != ANY_MD5 {
        let reason = format!(
            "request from [{}]: md5sums do not match: [{}] vs. [{}]",
            header.get(keys::CALLER_ID).unwrap_or_default(),
            md5,
            context.service_type.md5sum()
        );
        let reply = ConnectionHeader::new().with(keys::ERROR, reason.as_str());
        with_timeout(limit, reply.write_to(&mut stream)).await??;
        return Err(Error::Protocol(reason));
    }

    let reply = ConnectionHeader::new()
        .with(keys::CALLER_ID, context.caller_id.as_str())
        .with(keys::MD5SUM, context.service_type.md5sum())
        .with(keys::TYPE, context.service_type.name());
    with_timeout(limit, reply.write_to(&mut stream)).await??;

    if header.get(keys::PROBE) == Some("1") {
        debug!(service = %context.service, "Probe from {}", peer);
        return Ok(());
    }
    let persistent = header.get(keys::PERSISTENT) == Some("1");

    loop {
        let request = tokio::select! {
            _ = stopped(&mut quit) => return Ok(()),
            request = frame::read_frame(&mut stream) => request?,
        };
        let Some(request) = request else {
            return Ok(());
        };

        let (result_tx, result_rx) = oneshot::channel();
        let handler = Arc::clone(&context.handler);
        let job = Box::new(move || {
            let _ = result_tx.send(handler(&request));
        });
        tokio::select! {
            _ = stopped(&mut quit) => return Ok(()),
            sent = context.jobs.send(job) => sent?,
        }

        let outcome = tokio::select! {
            _ = stopped(&mut quit) => return Ok(()),
            outcome = result_rx => outcome
                .map_err(|_| Error::Shutdown("job queue".into()))?,
        };

        let mut response = Vec::new();
        match outcome {
            Ok(body) => {
                response.push(1);
                response.extend_from_slice(&frame::encode(&body));
            }
            Err(message) => {
                response.push(0);
                response.extend_from_slice(&frame::encode(message.as_bytes()));
            }
        }
        with_timeout(limit, async {
            stream.write_all(&response).await?;
            stream.flush().await
        })
        .await??;

        if !persistent {
            return Ok(());
        }
    }
}

/// Resolves once `quit` flips to true or its sender is gone.
async fn stopped(quit: &mut watch::Receiver<bool>) {
    let _ = quit.wait_for(|stop| *stop).await;
}

/// Bound one socket operation, mapping expiry to `TimedOut`.
pub(crate) async fn with_timeout<F, T>(limit: Duration, op: F) -> Result<F::Output>
where
    F: std::future::Future<Output = T>,
{
    timeout(limit, op).await.map_err(|_| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "socket operation timed out",
        ))
    })
}
