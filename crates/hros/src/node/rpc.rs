// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP front end of the slave API.
//!
//! - `POST /` - XML-RPC call
//! - `POST /RPC2` - same, for clients that append the classic path

use super::slave::SlaveApi;
use crate::xmlrpc::codec::{encode_fault, encode_response, parse_call};
use crate::xmlrpc::XmlRpcError;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const FAULT_PARSE: i32 = -32700;
const FAULT_INTERNAL: i32 = -32603;

fn router(api: Arc<SlaveApi>) -> Router {
    Router::new()
        .route("/", post(handle))
        .route("/RPC2", post(handle))
        .with_state(api)
}

async fn handle(State(api): State<Arc<SlaveApi>>, body: String) -> impl IntoResponse {
    let xml = match parse_call(&body) {
        Ok((method, params)) => match api.dispatch(&method, params).await {
            Ok(value) => encode_response(&value),
            Err(XmlRpcError::Fault { code, message }) => encode_fault(code, &message),
            Err(e) => encode_fault(FAULT_INTERNAL, &e.to_string()),
        },
        Err(e) => {
            debug!("Rejecting malformed slave call: {}", e);
            encode_fault(FAULT_PARSE, &e.to_string())
        }
    };
    ([(header::CONTENT_TYPE, "text/xml")], xml)
}

/// The running slave API server.
pub(crate) struct RpcServer {
    addr: SocketAddr,
    quit: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    /// Serve `api` on an already bound listener.
    pub fn start(listener: TcpListener, addr: SocketAddr, api: SlaveApi) -> Self {
        let (quit_tx, quit_rx) = oneshot::channel::<()>();
        let app = router(Arc::new(api));

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = quit_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!("Slave API server failed: {}", e);
            }
        });

        Self {
            addr,
            quit: Mutex::new(Some(quit_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Close the listener and wait for in-flight calls to finish.
    pub async fn stop(&self) {
        if let Some(quit) = self.quit.lock().take() {
            let _ = quit.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!("Slave API server on {} stopped", self.addr);
    }
}
