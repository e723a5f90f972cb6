// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hros - ROS1 client library
//!
//! Native ROS1 nodes on tokio: XML-RPC master/slave APIs, TCPROS topic
//! transport, services and parameters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hros::msgs::std_msgs::StringMsg;
//! use hros::{Node, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let node = Node::new("talker", std::env::args().skip(1)).await?;
//!     let chatter = node.advertise::<StringMsg>("chatter").await?;
//!
//!     while node.ok() {
//!         chatter.publish(&StringMsg::new("hello"))?;
//!         node.spin_once().await;
//!     }
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                    Node (names, params, job queue)                  |
//! +---------------------------------------------------------------------+
//! |   Publisher         |   Subscriber          |   Service server/client |
//! |   sessions, queues  |   links, reconcile    |   rosrpc connections    |
//! +---------------------------------------------------------------------+
//! |          TCPROS (headers, frames)     |     XML-RPC (master/slave)   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`node`] - Node lifecycle and entity factory (start here)
//! - [`publisher`] / [`subscriber`] - Topic transport
//! - [`service`] - Request/reply
//! - [`tcpros`] - Wire format
//! - [`xmlrpc`] - Master and slave API transport

/// Node configuration and ROS argument processing.
pub mod config;
/// Crate-wide error type.
pub mod error;
/// `tracing` subscriber setup.
pub mod logging;
/// Master API client.
pub mod master;
/// Message typing and serialization helpers.
pub mod message;
/// A few standard message and service types.
pub mod msgs;
/// Graph name resolution.
pub mod names;
pub mod node;
pub mod publisher;
pub mod service;
pub mod subscriber;
pub mod tcpros;
pub mod xmlrpc;

pub use config::{NodeConfig, TransportConfig};
pub use error::{Error, Result};
pub use message::{MessageEvent, MessageType, RosMessage};
pub use node::Node;
pub use publisher::{Publisher, PublisherCallbacks, RawPublisher, SingleSubscriberPublisher};
pub use service::{RawServiceClient, RosService, ServiceClient, ServiceServer, ServiceType};
pub use subscriber::{Subscriber, SubscriptionKind};
pub use xmlrpc::Value;
