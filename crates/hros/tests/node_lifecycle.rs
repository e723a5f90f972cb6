// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node startup, slave API surface, parameters and shutdown.

mod common;

use common::{spin_in_background, FakeMaster};
use hros::msgs::std_msgs::StringMsg;
use hros::xmlrpc::{Value, XmlRpcClient};
use hros::{Error, Node};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn slave_call(node_uri: &str, method: &str, extra: Vec<Value>) -> Vec<Value> {
    let rpc = XmlRpcClient::new(Duration::from_secs(2)).unwrap();
    let mut params = vec![Value::from("/tester")];
    params.extend(extra);
    rpc.call(node_uri, method, params)
        .await
        .unwrap()
        .into_array()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_private_params_pushed_at_startup() {
    let master = FakeMaster::start().await;
    let mut args = master.node_args();
    args.push("_rate:=10".to_string());
    args.push("__ns:=/robot".to_string());
    args.push("--verbose".to_string());

    let node = Node::new("talker", args).await.unwrap();
    assert_eq!(node.qualified_name(), "/robot/talker");
    assert_eq!(node.non_ros_args(), ["--verbose"]);
    assert_eq!(
        master.param("/robot/talker/rate").and_then(|v| v.as_i32()),
        Some(10)
    );
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_param_round_trip() {
    let master = FakeMaster::start().await;
    let node = Node::new("talker", master.node_args()).await.unwrap();

    node.set_param("~gain", 2.5).await.unwrap();
    assert!(node.has_param("~gain").await.unwrap());
    assert_eq!(node.get_param("/talker/gain").await.unwrap().as_f64(), Some(2.5));
    node.delete_param("~gain").await.unwrap();
    assert!(!node.has_param("~gain").await.unwrap());
    assert!(matches!(
        node.get_param("~gain").await,
        Err(Error::Master { code: -1, .. })
    ));
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slave_api_status_triples() {
    let master = FakeMaster::start().await;
    let node = Node::new("talker", master.node_args()).await.unwrap();

    let reply = slave_call(node.uri(), "getMasterUri", vec![]).await;
    assert_eq!(reply[0].as_i32(), Some(1));
    assert_eq!(reply[2].as_str(), Some(master.uri.as_str()));

    let reply = slave_call(node.uri(), "getPid", vec![]).await;
    assert_eq!(reply[2].as_i32(), Some(std::process::id() as i32));

    let reply = slave_call(node.uri(), "getBusStats", vec![]).await;
    assert_eq!(reply[0].as_i32(), Some(-1));
    assert_eq!(reply[1].as_str(), Some("Not implemented"));

    let reply = slave_call(node.uri(), "getSubscriptions", vec![]).await;
    assert_eq!(reply[2].as_array().map(<[Value]>::len), Some(0));

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slave_shutdown_flips_liveness() {
    let master = FakeMaster::start().await;
    let node = Node::new("talker", master.node_args()).await.unwrap();
    let spinner = spin_in_background(&node);
    assert!(node.ok());

    let reply = slave_call(node.uri(), "shutdown", vec![Value::from("test over")]).await;
    assert_eq!(reply[0].as_i32(), Some(1));
    assert!(!node.ok());
    timeout(WAIT, spinner).await.unwrap().unwrap();
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_is_complete_and_idempotent() {
    let master = FakeMaster::start().await;
    let node = Node::new("talker", master.node_args()).await.unwrap();
    let chatter = node.advertise::<StringMsg>("chatter").await.unwrap();
    let _sub = node
        .subscribe::<StringMsg, _>("other", |_| {})
        .await
        .unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    node.enqueue(move || flag.store(true, Ordering::SeqCst)).unwrap();
    assert!(node.spin_once().await);
    assert!(ran.load(Ordering::SeqCst));

    let uri = node.uri().to_string();
    node.shutdown().await;
    node.shutdown().await;

    assert!(!node.ok());
    assert_eq!(master.calls("unregisterPublisher").len(), 1);
    assert_eq!(master.calls("unregisterSubscriber").len(), 1);
    assert!(matches!(
        chatter.publish(&StringMsg::new("late")),
        Err(Error::Shutdown(_))
    ));
    assert!(matches!(node.enqueue(|| {}), Err(Error::Shutdown(_))));
    assert!(!node.spin_once().await);
    assert!(matches!(
        node.advertise::<StringMsg>("again").await,
        Err(Error::Shutdown(_))
    ));

    let rpc = XmlRpcClient::new(Duration::from_millis(500)).unwrap();
    assert!(rpc
        .call(&uri, "getPid", vec![Value::from("/tester")])
        .await
        .is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_master_fails_registration() {
    let node = Node::new(
        "talker",
        ["__master:=http://127.0.0.1:1/", "__ip:=127.0.0.1"],
    )
    .await
    .unwrap();
    assert!(matches!(
        node.advertise::<StringMsg>("chatter").await,
        Err(Error::Rpc(_))
    ));
    node.shutdown().await;
}
