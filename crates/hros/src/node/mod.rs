// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The node: owns the slave API server, the entity registries and the job
//! queue, and hands out publisher, subscriber and service handles.
//!
//! ```text
//!                 master (XML-RPC)
//!                   ^        |
//!     register/     |        |  publisherUpdate, requestTopic
//!     lookup        |        v
//!  +-----------------------------------------+
//!  | Node                                    |
//!  |  publishers   subscribers   services    |
//!  |       \            |           /        |
//!  |        +----> job queue <-----+         |
//!  |                   |                     |
//!  +-------------------|---------------------+
//!                      v
//!              spin() / spin_once()
//! ```
//!
//! Callbacks never run on network tasks; they are queued and executed by
//! whichever task spins the node.

pub(crate) mod jobs;
pub(crate) mod registry;
mod rpc;
mod slave;
mod tasks;

pub use jobs::Job;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::master::MasterClient;
use crate::message::{MessageEvent, MessageType, RosMessage};
use crate::names::NameResolver;
use crate::publisher::{Publisher, PublisherCallbacks, RawPublisher, TopicPublisher};
use crate::service::{
    RawServiceClient, RawServiceHandler, RosService, ServerEnv, ServiceClient, ServiceServer,
    ServiceType,
};
use crate::subscriber::{
    typed_callback, RawCallback, Subscriber, SubscriberEnv, SubscriptionKind, TopicSubscriber,
};
use crate::tcpros;
use crate::xmlrpc::{Value, XmlRpcClient};
use jobs::{JobQueue, JobSender};
use registry::Registry;
use rpc::RpcServer;
use slave::SlaveApi;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tasks::TaskGroup;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Process-visible "keep running" flag.
pub(crate) struct Liveness {
    tx: watch::Sender<bool>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            tx: watch::channel(true).0,
        }
    }

    pub fn is_alive(&self) -> bool {
        *self.tx.borrow()
    }

    /// Flip to stopped. Returns whether this call changed the state.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|alive| std::mem::replace(alive, false))
    }

    /// Resolves once the flag is down.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|alive| !*alive).await;
    }
}

pub(crate) struct NodeInner {
    config: NodeConfig,
    qualified_name: String,
    uri: String,
    resolver: NameResolver,
    master: MasterClient,
    rpc: XmlRpcClient,
    publishers: Arc<Registry<TopicPublisher>>,
    subscribers: Arc<Registry<TopicSubscriber>>,
    servers: Arc<Registry<ServiceServer>>,
    jobs: JobSender,
    job_queue: JobQueue,
    liveness: Arc<Liveness>,
    tasks: TaskGroup,
    rpc_server: RpcServer,
    shutting_down: AtomicBool,
}

/// A ROS node. Cheap to clone; every clone drives the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node from a base name and process arguments
    /// (`__master:=`, `__ns:=`, `from:=to`, `_param:=value`, ...).
    pub async fn new<I, S>(name: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_config(NodeConfig::from_args(name, args)?).await
    }

    /// Create a node from an explicit configuration.
    pub async fn with_config(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let qualified_name = config.qualified_name();
        let resolver = NameResolver::new(&config.namespace, &qualified_name, &config.remapping);
        let rpc = XmlRpcClient::new(config.transport.rpc_timeout)?;
        let (jobs, job_queue) = JobQueue::new(config.transport.job_queue_capacity);

        let listener = tcpros::bind_listener(config.listen_ip)?;
        let local_addr = listener.local_addr()?;
        let uri = format!("http://{}:{}/", config.hostname, local_addr.port());
        let master = MasterClient::new(
            rpc.clone(),
            config.master_uri.as_str(),
            qualified_name.as_str(),
            uri.as_str(),
        );

        let inner = Arc::new_cyclic(|weak| NodeInner {
            config,
            qualified_name,
            uri,
            resolver,
            master,
            rpc,
            publishers: Arc::new(Registry::new()),
            subscribers: Arc::new(Registry::new()),
            servers: Arc::new(Registry::new()),
            jobs,
            job_queue,
            liveness: Arc::new(Liveness::new()),
            tasks: TaskGroup::new(),
            rpc_server: RpcServer::start(listener, local_addr, SlaveApi::new(weak.clone())),
            shutting_down: AtomicBool::new(false),
        });
        let node = Self { inner };
        info!(
            node = %node.inner.qualified_name,
            "Slave API listening at {}", node.inner.uri
        );

        if let Err(e) = node.push_private_params().await {
            node.shutdown().await;
            return Err(e);
        }
        node.watch_signals();
        Ok(node)
    }

    async fn push_private_params(&self) -> Result<()> {
        for (key, value) in &self.inner.config.params {
            let resolved = self.inner.resolver.resolve(&format!("~{}", key))?;
            debug!("Setting private parameter {}", resolved);
            self.inner
                .master
                .set_param(&resolved, Value::from(value.clone()))
                .await?;
        }
        Ok(())
    }

    /// Ctrl-C flips liveness; the task exits once liveness is down.
    fn watch_signals(&self) {
        let liveness = Arc::clone(&self.inner.liveness);
        let node = self.inner.qualified_name.clone();
        self.inner.tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = liveness.stopped() => {}
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        info!(node = %node, "Interrupted");
                        liveness.stop();
                    }
                    Err(e) => warn!(node = %node, "Cannot listen for Ctrl-C: {}", e),
                },
            }
        }));
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Fully qualified node name, also the caller id.
    pub fn qualified_name(&self) -> &str {
        &self.inner.qualified_name
    }

    pub fn namespace(&self) -> &str {
        self.inner.resolver.namespace()
    }

    /// Slave API URI, `http://host:port/`.
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn master_uri(&self) -> &str {
        self.inner.master.master_uri()
    }

    /// Arguments left over after ROS argument processing.
    pub fn non_ros_args(&self) -> &[String] {
        &self.inner.config.non_ros_args
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Resolve and remap `name` the way topics and services are.
    pub fn resolve_name(&self, name: &str) -> Result<String> {
        self.inner.resolver.remap(name)
    }

    /// False once shutdown was requested (Ctrl-C, slave `shutdown`, or
    /// [`Node::shutdown`]).
    pub fn ok(&self) -> bool {
        self.inner.liveness.is_alive()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(Error::Shutdown(format!("node {}", self.inner.qualified_name)))
        }
    }

    // ---- publishing ----

    pub async fn advertise<T: RosMessage>(&self, topic: &str) -> Result<Publisher<T>> {
        self.advertise_with_callbacks(topic, PublisherCallbacks::default())
            .await
    }

    /// Advertise with per-subscriber connect/disconnect callbacks.
    ///
    /// Callbacks apply only when this call creates the publisher.
    pub async fn advertise_with_callbacks<T: RosMessage>(
        &self,
        topic: &str,
        callbacks: PublisherCallbacks,
    ) -> Result<Publisher<T>> {
        let raw = self
            .advertise_inner(topic, T::message_type(), callbacks)
            .await?;
        Ok(Publisher::new(raw))
    }

    pub async fn advertise_raw(&self, topic: &str, msg_type: MessageType) -> Result<RawPublisher> {
        self.advertise_inner(topic, msg_type, PublisherCallbacks::default())
            .await
    }

    async fn advertise_inner(
        &self,
        topic: &str,
        msg_type: MessageType,
        callbacks: PublisherCallbacks,
    ) -> Result<RawPublisher> {
        let name = self.inner.resolver.remap(topic)?;
        let registry = Arc::downgrade(&self.inner.publishers);

        let mut entries = self.inner.publishers.write().await;
        self.ensure_alive()?;
        if let Some(existing) = entries.get(&name) {
            check_same_type(&name, existing.message_type(), &msg_type)?;
            return Ok(RawPublisher::new(Arc::clone(existing), registry));
        }

        let (publisher, task) = TopicPublisher::start(
            name.clone(),
            msg_type,
            callbacks,
            self.inner.config.listen_ip,
            &self.inner.config.transport,
            self.inner.master.clone(),
            registry.clone(),
        )
        .await?;
        self.inner.tasks.push(task);
        entries.insert(name, Arc::clone(&publisher));
        Ok(RawPublisher::new(publisher, registry))
    }

    // ---- subscribing ----

    pub async fn subscribe<T, F>(&self, topic: &str, callback: F) -> Result<Subscriber<T>>
    where
        T: RosMessage,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_with_event(topic, move |msg, _: &MessageEvent| callback(msg))
            .await
    }

    /// Subscribe with access to the per-message [`MessageEvent`].
    pub async fn subscribe_with_event<T, F>(&self, topic: &str, callback: F) -> Result<Subscriber<T>>
    where
        T: RosMessage,
        F: Fn(T, &MessageEvent) + Send + Sync + 'static,
    {
        let name = self.inner.resolver.remap(topic)?;
        let callback = typed_callback::<T, F>(&name, callback);
        let (inner, kind, id) = self
            .subscribe_inner(name, T::message_type(), callback)
            .await?;
        Ok(Subscriber::new(inner, kind, id))
    }

    /// Subscribe to undecoded payloads.
    pub async fn subscribe_raw<F>(
        &self,
        topic: &str,
        msg_type: MessageType,
        callback: F,
    ) -> Result<Subscriber>
    where
        F: Fn(&[u8], &MessageEvent) + Send + Sync + 'static,
    {
        let name = self.inner.resolver.remap(topic)?;
        let (inner, kind, id) = self
            .subscribe_inner(name, msg_type, Arc::new(callback))
            .await?;
        Ok(Subscriber::new(inner, kind, id))
    }

    async fn subscribe_inner(
        &self,
        name: String,
        msg_type: MessageType,
        callback: RawCallback,
    ) -> Result<(Arc<TopicSubscriber>, SubscriptionKind, u64)> {
        let mut entries = self.inner.subscribers.write().await;
        self.ensure_alive()?;
        if let Some(existing) = entries.get(&name) {
            check_same_type(&name, existing.message_type(), &msg_type)?;
            let id = existing.add_callback(callback);
            return Ok((
                Arc::clone(existing),
                SubscriptionKind::AdditionalListener,
                id,
            ));
        }

        let env = SubscriberEnv {
            caller_id: self.inner.qualified_name.clone(),
            rpc: self.inner.rpc.clone(),
            master: self.inner.master.clone(),
            jobs: self.inner.jobs.clone(),
            registry: Arc::downgrade(&self.inner.subscribers),
        };
        let (subscriber, id, task) =
            TopicSubscriber::start(name.clone(), msg_type, callback, env).await?;
        self.inner.tasks.push(task);
        entries.insert(name, Arc::clone(&subscriber));
        Ok((subscriber, SubscriptionKind::Registered, id))
    }

    // ---- services ----

    /// Serve `S` with a typed handler. An `Err` is sent back to the caller
    /// as the failure message.
    pub async fn advertise_service<S, F>(&self, service: &str, handler: F) -> Result<Arc<ServiceServer>>
    where
        S: RosService,
        F: Fn(S::Request) -> std::result::Result<S::Response, String> + Send + Sync + 'static,
    {
        let handler: RawServiceHandler = Arc::new(move |bytes: &[u8]| {
            let request = S::Request::decode(bytes).map_err(|e| e.to_string())?;
            let response = handler(request)?;
            Ok(response.to_bytes())
        });
        self.advertise_service_raw(service, S::service_type(), handler)
            .await
    }

    /// Serve a service with a byte-level handler. An existing server for
    /// the same name is shut down and replaced.
    pub async fn advertise_service_raw(
        &self,
        service: &str,
        service_type: ServiceType,
        handler: RawServiceHandler,
    ) -> Result<Arc<ServiceServer>> {
        let name = self.inner.resolver.remap(service)?;
        self.ensure_alive()?;

        let previous = self.inner.servers.write().await.remove(&name);
        if let Some(previous) = previous {
            debug!(service = %name, "Replacing existing service server");
            previous.shutdown().await;
        }

        let env = ServerEnv {
            caller_id: self.inner.qualified_name.clone(),
            hostname: self.inner.config.hostname.clone(),
            listen_ip: self.inner.config.listen_ip,
            tcp_timeout: self.inner.config.transport.service_tcp_timeout,
            master: self.inner.master.clone(),
            jobs: self.inner.jobs.clone(),
            registry: Arc::downgrade(&self.inner.servers),
        };
        let mut entries = self.inner.servers.write().await;
        self.ensure_alive()?;
        let (server, task) = ServiceServer::start(name.clone(), service_type, handler, env).await?;
        self.inner.tasks.push(task);
        entries.insert(name, Arc::clone(&server));
        Ok(server)
    }

    pub fn service_client<S: RosService>(&self, service: &str) -> Result<ServiceClient<S>> {
        Ok(ServiceClient::new(
            self.service_client_raw(service, S::service_type())?,
        ))
    }

    pub fn service_client_raw(
        &self,
        service: &str,
        service_type: ServiceType,
    ) -> Result<RawServiceClient> {
        let name = self.inner.resolver.remap(service)?;
        Ok(RawServiceClient::new(
            name,
            service_type,
            self.inner.master.clone(),
            self.inner.config.transport.service_tcp_timeout,
        ))
    }

    // ---- parameters ----

    pub async fn get_param(&self, key: &str) -> Result<Value> {
        let key = self.inner.resolver.resolve(key)?;
        self.inner.master.get_param(&key).await
    }

    pub async fn set_param(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let key = self.inner.resolver.resolve(key)?;
        self.inner.master.set_param(&key, value.into()).await
    }

    pub async fn has_param(&self, key: &str) -> Result<bool> {
        let key = self.inner.resolver.resolve(key)?;
        self.inner.master.has_param(&key).await
    }

    /// Search upward from the node namespace; `key` is sent unresolved.
    pub async fn search_param(&self, key: &str) -> Result<String> {
        self.inner.master.search_param(key).await
    }

    pub async fn delete_param(&self, key: &str) -> Result<()> {
        let key = self.inner.resolver.resolve(key)?;
        self.inner.master.delete_param(&key).await
    }

    // ---- executing ----

    /// Queue a job for the spinning task. Fails once the node shut down or
    /// while the queue is full.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.inner.jobs.try_send(Box::new(job))
    }

    /// Run at most one queued job, waiting briefly for one. Returns whether
    /// a job ran.
    pub async fn spin_once(&self) -> bool {
        self.inner
            .job_queue
            .run_one(self.inner.config.transport.spin_once_timeout)
            .await
    }

    /// Run jobs until the node stops being [`ok`](Node::ok).
    pub async fn spin(&self) {
        let idle = self.inner.config.transport.spin_timeout;
        while self.ok() {
            tokio::select! {
                _ = self.inner.job_queue.run_one(idle) => {}
                _ = self.inner.liveness.stopped() => break,
            }
        }
        debug!(node = %self.inner.qualified_name, "Spin finished");
    }

    /// Stop everything: subscribers, publishers, service servers, background
    /// tasks, the job queue, then the slave API. Only the first call has an
    /// effect; later calls return at once.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(node = %inner.qualified_name, "Shutting down");
        inner.liveness.stop();

        for (_, subscriber) in inner.subscribers.drain().await {
            subscriber.shutdown().await;
        }
        for (_, publisher) in inner.publishers.drain().await {
            publisher.shutdown().await;
        }
        for (_, server) in inner.servers.drain().await {
            server.shutdown().await;
        }
        inner.tasks.wait().await;
        inner.job_queue.close().await;
        inner.rpc_server.stop().await;
        info!(node = %inner.qualified_name, "Shut down");
    }
}

fn check_same_type(name: &str, existing: &MessageType, requested: &MessageType) -> Result<()> {
    if existing.md5sum() == requested.md5sum() && existing.name() == requested.name() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "{} is already used with type {} [{}], not {} [{}]",
            name,
            existing.name(),
            existing.md5sum(),
            requested.name(),
            requested.md5sum()
        )))
    }
}
