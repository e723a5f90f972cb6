// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process ROS master for integration tests.

#![allow(dead_code)]

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use hros::master::{api_result, ApiStatus};
use hros::xmlrpc::codec::{encode_fault, encode_response, parse_call};
use hros::xmlrpc::{Value, XmlRpcClient};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Default)]
struct Topics {
    publishers: HashMap<String, Vec<String>>,
    subscribers: HashMap<String, Vec<String>>,
}

struct MasterState {
    uri: String,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    topics: Mutex<Topics>,
    services: Mutex<HashMap<String, String>>,
    params: Mutex<HashMap<String, Value>>,
    rpc: XmlRpcClient,
}

/// Records every call and notifies subscribers on publisher changes.
pub struct FakeMaster {
    pub uri: String,
    state: Arc<MasterState>,
    quit: Option<oneshot::Sender<()>>,
}

impl FakeMaster {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("http://{}/", listener.local_addr().unwrap());
        let state = Arc::new(MasterState {
            uri: uri.clone(),
            calls: Mutex::new(Vec::new()),
            topics: Mutex::new(Topics::default()),
            services: Mutex::new(HashMap::new()),
            params: Mutex::new(HashMap::new()),
            rpc: XmlRpcClient::new(Duration::from_secs(2)).unwrap(),
        });

        let app = Router::new()
            .route("/", post(handle))
            .with_state(Arc::clone(&state));
        let (quit_tx, quit_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = quit_rx.await;
                })
                .await;
        });

        Self {
            uri,
            state,
            quit: Some(quit_tx),
        }
    }

    /// Arguments pointing a node at this master on loopback.
    pub fn node_args(&self) -> Vec<String> {
        vec![
            format!("__master:={}", self.uri),
            "__ip:=127.0.0.1".to_string(),
        ]
    }

    /// Parameters of every recorded call to `method`.
    pub fn calls(&self, method: &str) -> Vec<Vec<Value>> {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn publishers(&self, topic: &str) -> Vec<String> {
        self.state
            .topics
            .lock()
            .publishers
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.state
            .topics
            .lock()
            .subscribers
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn service(&self, name: &str) -> Option<String> {
        self.state.services.lock().get(name).cloned()
    }

    pub fn param(&self, key: &str) -> Option<Value> {
        self.state.params.lock().get(key).cloned()
    }
}

impl Drop for FakeMaster {
    fn drop(&mut self) {
        if let Some(quit) = self.quit.take() {
            let _ = quit.send(());
        }
    }
}

async fn handle(State(state): State<Arc<MasterState>>, body: String) -> String {
    let Ok((method, params)) = parse_call(&body) else {
        return encode_fault(-32700, "parse error");
    };
    state.calls.lock().push((method.clone(), params.clone()));
    let text = |i: usize| {
        params
            .get(i)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let reply = match method.as_str() {
        "registerPublisher" => {
            let (topic, api) = (text(1), text(3));
            let (publishers, subscribers) = {
                let mut topics = state.topics.lock();
                let publishers = topics.publishers.entry(topic.clone()).or_default();
                if !publishers.contains(&api) {
                    publishers.push(api);
                }
                let publishers = publishers.clone();
                let subscribers = topics.subscribers.get(&topic).cloned().unwrap_or_default();
                (publishers, subscribers)
            };
            notify(&state, &topic, &publishers, &subscribers);
            api_result(ApiStatus::Success, "", subscribers)
        }
        "unregisterPublisher" => {
            let (topic, api) = (text(1), text(2));
            let (publishers, subscribers) = {
                let mut topics = state.topics.lock();
                let publishers = topics.publishers.entry(topic.clone()).or_default();
                publishers.retain(|p| p != &api);
                let publishers = publishers.clone();
                let subscribers = topics.subscribers.get(&topic).cloned().unwrap_or_default();
                (publishers, subscribers)
            };
            notify(&state, &topic, &publishers, &subscribers);
            api_result(ApiStatus::Success, "", 1)
        }
        "registerSubscriber" => {
            let (topic, api) = (text(1), text(3));
            let mut topics = state.topics.lock();
            let subscribers = topics.subscribers.entry(topic.clone()).or_default();
            if !subscribers.contains(&api) {
                subscribers.push(api);
            }
            let publishers = topics.publishers.get(&topic).cloned().unwrap_or_default();
            api_result(ApiStatus::Success, "", publishers)
        }
        "unregisterSubscriber" => {
            let (topic, api) = (text(1), text(2));
            if let Some(subscribers) = state.topics.lock().subscribers.get_mut(&topic) {
                subscribers.retain(|s| s != &api);
            }
            api_result(ApiStatus::Success, "", 1)
        }
        "registerService" => {
            state.services.lock().insert(text(1), text(2));
            api_result(ApiStatus::Success, "", 0)
        }
        "unregisterService" => {
            let mut services = state.services.lock();
            if services.get(&text(1)) == Some(&text(2)) {
                services.remove(&text(1));
            }
            api_result(ApiStatus::Success, "", 1)
        }
        "lookupService" => match state.services.lock().get(&text(1)) {
            Some(uri) => api_result(ApiStatus::Success, "", uri.as_str()),
            None => api_result(ApiStatus::Error, "no provider", ""),
        },
        "setParam" => {
            let value = params.get(2).cloned().unwrap_or(Value::Int(0));
            state.params.lock().insert(text(1), value);
            api_result(ApiStatus::Success, "", 0)
        }
        "getParam" => match state.params.lock().get(&text(1)) {
            Some(value) => api_result(ApiStatus::Success, "", value.clone()),
            None => api_result(ApiStatus::Error, "Parameter is not set", 0),
        },
        "hasParam" => {
            let present = state.params.lock().contains_key(&text(1));
            api_result(ApiStatus::Success, "", present)
        }
        "deleteParam" => {
            state.params.lock().remove(&text(1));
            api_result(ApiStatus::Success, "", 0)
        }
        "searchParam" => api_result(ApiStatus::Success, "", format!("/{}", text(1))),
        "getUri" => api_result(ApiStatus::Success, "", state.uri.as_str()),
        _ => return encode_fault(-32601, "unknown method"),
    };
    encode_response(&reply)
}

fn notify(state: &Arc<MasterState>, topic: &str, publishers: &[String], subscribers: &[String]) {
    for subscriber in subscribers {
        let rpc = state.rpc.clone();
        let uri = subscriber.clone();
        let params = vec![
            Value::from("/master"),
            Value::from(topic),
            Value::from(publishers.to_vec()),
        ];
        tokio::spawn(async move {
            let _ = rpc.call(&uri, "publisherUpdate", params).await;
        });
    }
}

/// Poll `check` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Spin `node` on a background task until it stops.
pub fn spin_in_background(node: &hros::Node) -> tokio::task::JoinHandle<()> {
    let node = node.clone();
    tokio::spawn(async move { node.spin().await })
}
