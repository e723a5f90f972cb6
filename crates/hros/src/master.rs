// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client for the ROS master: registrations, service lookup and the
//! parameter server.
//!
//! Every master and slave API method answers `[code, statusMessage, value]`
//! where `code` is `1` on success; anything else becomes
//! [`Error::Master`].

use crate::error::{Error, Result};
use crate::xmlrpc::{Value, XmlRpcClient};
use tracing::debug;

/// Status code of a ROS API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Error = -1,
    Failure = 0,
    Success = 1,
}

impl ApiStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Build a `[code, message, value]` response triple.
pub fn api_result(status: ApiStatus, message: &str, value: impl Into<Value>) -> Value {
    Value::Array(vec![
        Value::Int(status.code()),
        Value::from(message),
        value.into(),
    ])
}

/// Unpack a `[code, message, value]` triple, failing on non-success.
pub fn api_value(method: &str, response: Value) -> Result<Value> {
    let malformed = || Error::Protocol(format!("{} returned a malformed status triple", method));

    let mut items = response.into_array().ok_or_else(malformed)?.into_iter();
    let (Some(code), Some(message), Some(value)) = (items.next(), items.next(), items.next())
    else {
        return Err(malformed());
    };
    let code = code.as_i32().ok_or_else(malformed)?;
    if code != ApiStatus::Success.code() {
        return Err(Error::Master {
            method: method.to_string(),
            code,
            message: message.as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(value)
}

/// Call a ROS API `method` on `uri` and unpack the status triple.
pub async fn call_api(
    rpc: &XmlRpcClient,
    uri: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<Value> {
    let response = rpc.call(uri, method, params).await?;
    api_value(method, response)
}

/// One consolidated client for every master call a node makes.
#[derive(Clone)]
pub struct MasterClient {
    rpc: XmlRpcClient,
    master_uri: String,
    caller_id: String,
    caller_api: String,
}

impl MasterClient {
    /// `caller_api` is the node's slave API URI.
    pub fn new(
        rpc: XmlRpcClient,
        master_uri: impl Into<String>,
        caller_id: impl Into<String>,
        caller_api: impl Into<String>,
    ) -> Self {
        Self {
            rpc,
            master_uri: master_uri.into(),
            caller_id: caller_id.into(),
            caller_api: caller_api.into(),
        }
    }

    pub fn master_uri(&self) -> &str {
        &self.master_uri
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn caller_api(&self) -> &str {
        &self.caller_api
    }

    pub fn rpc(&self) -> &XmlRpcClient {
        &self.rpc
    }

    async fn call(&self, method: &str, mut params: Vec<Value>) -> Result<Value> {
        params.insert(0, Value::from(&self.caller_id));
        debug!("Master API {}({:?})", method, params);
        call_api(&self.rpc, &self.master_uri, method, params).await
    }

    /// Returns the slave URIs of current subscribers.
    pub async fn register_publisher(&self, topic: &str, type_name: &str) -> Result<Vec<String>> {
        let value = self
            .call(
                "registerPublisher",
                vec![topic.into(), type_name.into(), Value::from(&self.caller_api)],
            )
            .await?;
        string_list("registerPublisher", &value)
    }

    /// Returns the number of registrations removed.
    pub async fn unregister_publisher(&self, topic: &str) -> Result<i32> {
        let value = self
            .call(
                "unregisterPublisher",
                vec![topic.into(), Value::from(&self.caller_api)],
            )
            .await?;
        Ok(value.as_i32().unwrap_or_default())
    }

    /// Returns the slave URIs of current publishers.
    pub async fn register_subscriber(&self, topic: &str, type_name: &str) -> Result<Vec<String>> {
        let value = self
            .call(
                "registerSubscriber",
                vec![topic.into(), type_name.into(), Value::from(&self.caller_api)],
            )
            .await?;
        string_list("registerSubscriber", &value)
    }

    pub async fn unregister_subscriber(&self, topic: &str) -> Result<i32> {
        let value = self
            .call(
                "unregisterSubscriber",
                vec![topic.into(), Value::from(&self.caller_api)],
            )
            .await?;
        Ok(value.as_i32().unwrap_or_default())
    }

    /// `service_api` is the `rosrpc://host:port` endpoint of the server.
    pub async fn register_service(&self, service: &str, service_api: &str) -> Result<()> {
        self.call(
            "registerService",
            vec![
                service.into(),
                service_api.into(),
                Value::from(&self.caller_api),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn unregister_service(&self, service: &str, service_api: &str) -> Result<i32> {
        let value = self
            .call("unregisterService", vec![service.into(), service_api.into()])
            .await?;
        Ok(value.as_i32().unwrap_or_default())
    }

    /// Returns the `rosrpc://` URI of the service provider.
    pub async fn lookup_service(&self, service: &str) -> Result<String> {
        let value = self.call("lookupService", vec![service.into()]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol("lookupService returned a non-string URI".into()))
    }

    pub async fn get_param(&self, key: &str) -> Result<Value> {
        self.call("getParam", vec![key.into()]).await
    }

    pub async fn set_param(&self, key: &str, value: Value) -> Result<()> {
        self.call("setParam", vec![key.into(), value]).await?;
        Ok(())
    }

    pub async fn has_param(&self, key: &str) -> Result<bool> {
        let value = self.call("hasParam", vec![key.into()]).await?;
        value
            .as_bool()
            .ok_or_else(|| Error::Protocol("hasParam returned a non-boolean".into()))
    }

    /// Returns the closest matching key.
    pub async fn search_param(&self, key: &str) -> Result<String> {
        let value = self.call("searchParam", vec![key.into()]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol("searchParam returned a non-string key".into()))
    }

    pub async fn delete_param(&self, key: &str) -> Result<()> {
        self.call("deleteParam", vec![key.into()]).await?;
        Ok(())
    }
}

fn string_list(method: &str, value: &Value) -> Result<Vec<String>> {
    value
        .to_string_list()
        .ok_or_else(|| Error::Protocol(format!("{} returned a non-string URI list", method)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_value_success() {
        let response = api_result(ApiStatus::Success, "ok", vec!["http://a:1/"]);
        let value = api_value("registerSubscriber", response).unwrap();
        assert_eq!(string_list("x", &value).unwrap(), ["http://a:1/"]);
    }

    #[test]
    fn test_api_value_failure_carries_status() {
        let response = api_result(ApiStatus::Failure, "No such topic", 0);
        match api_value("requestTopic", response) {
            Err(Error::Master {
                method,
                code,
                message,
            }) => {
                assert_eq!(method, "requestTopic");
                assert_eq!(code, 0);
                assert_eq!(message, "No such topic");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_api_value_malformed() {
        assert!(matches!(
            api_value("getPid", Value::Int(1)),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            api_value("getPid", Value::from(vec![Value::Int(1)])),
            Err(Error::Protocol(_))
        ));
    }
}
