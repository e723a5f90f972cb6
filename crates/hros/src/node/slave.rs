// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slave API: the XML-RPC surface the master and peer nodes call.
//!
//! | method             | reply value                              |
//! |--------------------|------------------------------------------|
//! | `getBusStats`      | `-1` "Not implemented"                   |
//! | `getBusInfo`       | `-1` "Not implemented"                   |
//! | `getMasterUri`     | master URI                               |
//! | `shutdown`         | flips liveness                           |
//! | `getPid`           | process id                               |
//! | `getSubscriptions` | `[[topic, type], ...]`                   |
//! | `getPublications`  | `[[topic, type], ...]`                   |
//! | `paramUpdate`      | `-1` "Not implemented"                   |
//! | `publisherUpdate`  | queues a topology update                 |
//! | `requestTopic`     | `["TCPROS", host, port]`                 |

use super::NodeInner;
use crate::master::{api_result, ApiStatus};
use crate::tcpros::PROTOCOL_NAME;
use crate::xmlrpc::{Value, XmlRpcError};
use std::sync::Weak;
use tracing::{debug, info};

/// Fault code for calls that are not valid XML-RPC for this surface.
const FAULT_INVALID_PARAMS: i32 = -32602;
const FAULT_NO_METHOD: i32 = -32601;

/// Dispatches slave API calls to a node.
pub(crate) struct SlaveApi {
    node: Weak<NodeInner>,
}

impl SlaveApi {
    pub fn new(node: Weak<NodeInner>) -> Self {
        Self { node }
    }

    /// Handle one call; protocol-level problems become faults.
    pub async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, XmlRpcError> {
        let node = self.node.upgrade().ok_or_else(|| XmlRpcError::Fault {
            code: FAULT_NO_METHOD,
            message: "node is gone".into(),
        })?;
        let caller = str_param(method, &params, 0)?;
        debug!("Slave API {} from {}", method, caller);

        let reply = match method {
            "getBusStats" | "getBusInfo" | "paramUpdate" => {
                api_result(ApiStatus::Error, "Not implemented", 0)
            }
            "getMasterUri" => api_result(ApiStatus::Success, "Success", node.master.master_uri()),
            "shutdown" => {
                let reason = params.get(1).and_then(Value::as_str).unwrap_or_default();
                info!("Shutdown requested by {}: {}", caller, reason);
                node.liveness.stop();
                api_result(ApiStatus::Success, "Success", 0)
            }
            "getPid" => api_result(
                ApiStatus::Success,
                "Success",
                i32::try_from(std::process::id()).unwrap_or(i32::MAX),
            ),
            "getSubscriptions" => {
                let pairs = topic_pairs(
                    node.subscribers
                        .read()
                        .await
                        .iter()
                        .map(|(topic, s)| (topic.clone(), s.message_type().name().to_string())),
                );
                api_result(ApiStatus::Success, "Success", pairs)
            }
            "getPublications" => {
                let pairs = topic_pairs(
                    node.publishers
                        .read()
                        .await
                        .iter()
                        .map(|(topic, p)| (topic.clone(), p.message_type().name().to_string())),
                );
                api_result(ApiStatus::Success, "Success", pairs)
            }
            "publisherUpdate" => {
                let topic = str_param(method, &params, 1)?;
                let publishers = params
                    .get(2)
                    .and_then(Value::to_string_list)
                    .ok_or_else(|| invalid(method, "publishers must be a list of URIs"))?;
                node.publisher_update(topic, publishers).await
            }
            "requestTopic" => {
                let topic = str_param(method, &params, 1)?;
                let protocols = params
                    .get(2)
                    .and_then(Value::as_array)
                    .ok_or_else(|| invalid(method, "protocols must be a list"))?;
                node.request_topic(topic, protocols).await
            }
            _ => {
                return Err(XmlRpcError::Fault {
                    code: FAULT_NO_METHOD,
                    message: format!("method {} is not supported", method),
                })
            }
        };
        Ok(reply)
    }
}

impl NodeInner {
    /// Route a new publisher list to the subscriber through the job queue.
    async fn publisher_update(&self, topic: &str, publishers: Vec<String>) -> Value {
        let Some(subscriber) = self.subscribers.get(topic).await else {
            debug!("publisherUpdate for unsubscribed topic {}", topic);
            return api_result(ApiStatus::Failure, "No such topic", 0);
        };

        let job = Box::new(move || {
            if let Err(e) = subscriber.update_publishers(publishers) {
                debug!(topic = %subscriber.topic(), "Publisher update dropped: {}", e);
            }
        });
        match self.jobs.send(job).await {
            Ok(()) => api_result(ApiStatus::Success, "Success", 0),
            Err(_) => api_result(ApiStatus::Failure, "Node is shutting down", 0),
        }
    }

    /// Offer our TCPROS endpoint if we publish `topic`.
    async fn request_topic(&self, topic: &str, protocols: &[Value]) -> Value {
        let Some(publisher) = self.publishers.get(topic).await else {
            debug!("requestTopic for unpublished topic {}", topic);
            return api_result(ApiStatus::Failure, "No such topic", 0);
        };

        let wants_tcpros = protocols.iter().any(|p| {
            p.as_array()
                .and_then(|fields| fields.first())
                .and_then(Value::as_str)
                == Some(PROTOCOL_NAME)
        });
        if !wants_tcpros {
            return api_result(ApiStatus::Failure, "No supported protocol", 0);
        }

        api_result(
            ApiStatus::Success,
            "Success",
            vec![
                Value::from(PROTOCOL_NAME),
                Value::from(self.config.hostname.as_str()),
                Value::from(publisher.port()),
            ],
        )
    }
}

fn topic_pairs(pairs: impl Iterator<Item = (String, String)>) -> Value {
    let mut pairs: Vec<_> = pairs.collect();
    pairs.sort();
    Value::Array(
        pairs
            .into_iter()
            .map(|(topic, type_name)| Value::from(vec![topic, type_name]))
            .collect(),
    )
}

fn str_param<'a>(method: &str, params: &'a [Value], index: usize) -> Result<&'a str, XmlRpcError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(method, &format!("parameter {} must be a string", index)))
}

fn invalid(method: &str, detail: &str) -> XmlRpcError {
    XmlRpcError::Fault {
        code: FAULT_INVALID_PARAMS,
        message: format!("{}: {}", method, detail),
    }
}
