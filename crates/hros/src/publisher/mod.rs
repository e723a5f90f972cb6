// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic publishing.
//!
//! Each advertised topic gets a [`TopicPublisher`] made of three kinds of
//! tasks:
//!
//! - an accept loop owning the listening socket,
//! - a control task owning the session set (the only writer to it),
//! - one task per subscriber session.
//!
//! `publish` hands the payload to the control task, which pushes it onto
//! every session's bounded queue. Readers observe the session set through a
//! `watch` snapshot.

mod session;

pub use session::SessionError;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::master::MasterClient;
use crate::message::{MessageType, RosMessage};
use crate::node::registry::Registry;
use crate::tcpros::{self, OutboundQueue};
use session::{SessionEvent, SessionId, SessionParams};
use std::collections::HashMap;
use std::io;
use std::marker::PhantomData;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connect/disconnect callback; receives a handle to that one subscriber.
pub type ConnectionCallback = Arc<dyn Fn(SingleSubscriberPublisher) + Send + Sync>;

/// Optional per-publisher subscriber lifecycle callbacks.
#[derive(Clone, Default)]
pub struct PublisherCallbacks {
    pub on_connect: Option<ConnectionCallback>,
    pub on_disconnect: Option<ConnectionCallback>,
}

impl PublisherCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, f: impl Fn(SingleSubscriberPublisher) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(
        mut self,
        f: impl Fn(SingleSubscriberPublisher) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }
}

/// Publishes to exactly one subscriber session.
#[derive(Clone)]
pub struct SingleSubscriberPublisher {
    topic: String,
    subscriber_name: String,
    queue: Arc<OutboundQueue>,
}

impl SingleSubscriberPublisher {
    /// `callerid` the subscriber sent in its handshake.
    pub fn subscriber_name(&self) -> &str {
        &self.subscriber_name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn publish<T: RosMessage>(&self, msg: &T) {
        self.publish_raw(msg.to_bytes());
    }

    pub fn publish_raw(&self, payload: impl Into<Arc<[u8]>>) {
        self.queue.push(payload.into());
    }
}

impl std::fmt::Debug for SingleSubscriberPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleSubscriberPublisher")
            .field("topic", &self.topic)
            .field("subscriber_name", &self.subscriber_name)
            .finish()
    }
}

/// Read-only view of the session set.
#[derive(Debug, Clone, Default)]
pub struct PublisherSnapshot {
    /// Caller ids of sessions past the handshake.
    pub subscribers: Vec<String>,
}

enum Command {
    Publish(Arc<[u8]>),
    Shutdown(oneshot::Sender<()>),
}

enum AcceptEvent {
    Accepted(TcpStream, SocketAddr),
    Failed(io::Error),
}

/// The per-topic publishing engine shared by every handle for that topic.
pub struct TopicPublisher {
    topic: String,
    msg_type: MessageType,
    local_addr: SocketAddr,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<PublisherSnapshot>,
    shut_down: AtomicBool,
}

/// Where a control task learns about accepted connections.
struct AcceptSource {
    events: mpsc::Receiver<AcceptEvent>,
    quit: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Everything a publisher needs besides its accept source.
struct Setup {
    topic: String,
    msg_type: MessageType,
    local_addr: SocketAddr,
    callbacks: PublisherCallbacks,
    master: MasterClient,
    registry: Weak<Registry<TopicPublisher>>,
}

impl TopicPublisher {
    /// Bind the listener, register with the master, then start the tasks.
    ///
    /// Returns the publisher and its control task handle.
    pub(crate) async fn start(
        topic: String,
        msg_type: MessageType,
        callbacks: PublisherCallbacks,
        listen_ip: IpAddr,
        transport: &TransportConfig,
        master: MasterClient,
        registry: Weak<Registry<TopicPublisher>>,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let listener = tcpros::bind_listener(listen_ip)?;
        let local_addr = listener.local_addr()?;

        let subscribers = master
            .register_publisher(&topic, msg_type.name())
            .await?;
        debug!(topic = %topic, "Registered publisher; {} subscriber(s) known", subscribers.len());

        let (accept_tx, accept_rx) = mpsc::channel(16);
        let (accept_quit_tx, accept_quit_rx) = oneshot::channel();
        let accept = AcceptSource {
            events: accept_rx,
            quit: accept_quit_tx,
            task: tokio::spawn(accept_loop(listener, accept_tx, accept_quit_rx)),
        };

        info!(topic = %topic, "Publishing on {}", local_addr);
        let setup = Setup {
            topic,
            msg_type,
            local_addr,
            callbacks,
            master,
            registry,
        };
        Ok(Self::launch(setup, transport, accept))
    }

    fn launch(
        setup: Setup,
        transport: &TransportConfig,
        accept: AcceptSource,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(transport.publisher_channel_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(PublisherSnapshot::default());
        let (session_tx, session_rx) = mpsc::channel(64);

        let publisher = Arc::new(Self {
            topic: setup.topic.clone(),
            msg_type: setup.msg_type.clone(),
            local_addr: setup.local_addr,
            commands: commands_tx,
            snapshot: snapshot_rx,
            shut_down: AtomicBool::new(false),
        });

        let control = ControlTask {
            params: SessionParams {
                topic: setup.topic,
                type_name: setup.msg_type.name().to_string(),
                md5sum: setup.msg_type.md5sum().to_string(),
                flush_interval: transport.flush_interval,
                write_deadline: transport.write_deadline,
            },
            queue_capacity: transport.queue_capacity,
            callbacks: setup.callbacks,
            callback_tasks: Vec::new(),
            master: setup.master,
            owner: Arc::downgrade(&publisher),
            registry: setup.registry,
            commands: commands_rx,
            accept_events: accept.events,
            accept_quit: Some(accept.quit),
            accept_task: Some(accept.task),
            session_tx,
            session_rx,
            sessions: HashMap::new(),
            next_id: 0,
            snapshot: snapshot_tx,
        };
        let handle = tokio::spawn(control.run());
        (publisher, handle)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn message_type(&self) -> &MessageType {
        &self.msg_type
    }

    /// Port of the TCPROS listener.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Queue `payload` for every connected subscriber.
    ///
    /// No delivery guarantee; if the control task is saturated the payload
    /// is dropped.
    pub fn publish(&self, payload: Arc<[u8]>) -> Result<()> {
        match self.commands.try_send(Command::Publish(payload)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(topic = %self.topic, "Publisher input full, dropping message");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Shutdown(format!("publisher {}", self.topic)))
            }
        }
    }

    /// Subscribers past the handshake.
    pub fn num_subscribers(&self) -> usize {
        self.snapshot.borrow().subscribers.len()
    }

    pub fn snapshot(&self) -> PublisherSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop listening, unregister, close every session. Only the first call
    /// has an effect.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<AcceptEvent>,
    mut quit: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut quit => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if events.send(AcceptEvent::Accepted(stream, peer)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = events.send(AcceptEvent::Failed(e)).await;
                    break;
                }
            },
        }
    }
}

struct SessionHandle {
    queue: Arc<OutboundQueue>,
    quit: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    /// Set once the handshake succeeded.
    caller_id: Option<String>,
}

struct ControlTask {
    params: SessionParams,
    queue_capacity: usize,
    callbacks: PublisherCallbacks,
    /// Connect/disconnect callbacks still running; joined at teardown.
    callback_tasks: Vec<JoinHandle<()>>,
    master: MasterClient,
    owner: Weak<TopicPublisher>,
    registry: Weak<Registry<TopicPublisher>>,
    commands: mpsc::Receiver<Command>,
    accept_events: mpsc::Receiver<AcceptEvent>,
    accept_quit: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    session_tx: mpsc::Sender<SessionEvent>,
    session_rx: mpsc::Receiver<SessionEvent>,
    sessions: HashMap<SessionId, SessionHandle>,
    next_id: SessionId,
    snapshot: watch::Sender<PublisherSnapshot>,
}

impl ControlTask {
    async fn run(mut self) {
        let mut ack = None;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Publish(payload)) => self.fan_out(payload),
                    Some(Command::Shutdown(done)) => {
                        ack = Some(done);
                        break;
                    }
                    None => break,
                },
                event = self.accept_events.recv() => match event {
                    Some(AcceptEvent::Accepted(stream, peer)) => self.spawn_session(stream, peer),
                    Some(AcceptEvent::Failed(e)) => {
                        error!(topic = %self.params.topic, "Listener failed: {}", e);
                        self.abandon().await;
                        break;
                    }
                    None => break,
                },
                Some(event) = self.session_rx.recv() => self.on_session_event(event),
            }
        }

        self.teardown().await;
        if let Some(done) = ack {
            let _ = done.send(());
        }
    }

    fn fan_out(&self, payload: Arc<[u8]>) {
        for session in self.sessions.values() {
            if session.queue.push(Arc::clone(&payload)) {
                debug!(topic = %self.params.topic, "Session queue full, dropped oldest message");
            }
        }
    }

    fn spawn_session(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;
        debug!(topic = %self.params.topic, session = id, "Accepted connection from {}", peer);

        let queue = Arc::new(OutboundQueue::new(self.queue_capacity));
        let (quit_tx, quit_rx) = oneshot::channel();
        let params = self.params.clone();
        let events = self.session_tx.clone();
        let session_queue = Arc::clone(&queue);

        let task = tokio::spawn(async move {
            let result = session::run(id, stream, &params, &session_queue, quit_rx, &events).await;
            let _ = events.send(SessionEvent::Closed { id, result }).await;
        });

        self.sessions.insert(
            id,
            SessionHandle {
                queue,
                quit: Some(quit_tx),
                task,
                caller_id: None,
            },
        );
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Established { id, caller_id } => {
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                session.caller_id = Some(caller_id.clone());
                let queue = Arc::clone(&session.queue);
                let handle = self.single_publisher(caller_id, &queue);
                self.publish_snapshot();
                self.notify(self.callbacks.on_connect.clone(), handle);
            }
            SessionEvent::Closed { id, result } => {
                let Some(session) = self.sessions.remove(&id) else {
                    return;
                };
                match result {
                    Ok(()) => debug!(topic = %self.params.topic, session = id, "Session closed"),
                    Err(e) => warn!(topic = %self.params.topic, session = id, "Session ended: {}", e),
                }
                if let Some(caller_id) = session.caller_id {
                    let handle = self.single_publisher(caller_id, &session.queue);
                    self.publish_snapshot();
                    self.notify(self.callbacks.on_disconnect.clone(), handle);
                }
            }
        }
    }

    fn single_publisher(
        &self,
        subscriber_name: String,
        queue: &Arc<OutboundQueue>,
    ) -> SingleSubscriberPublisher {
        SingleSubscriberPublisher {
            topic: self.params.topic.clone(),
            subscriber_name,
            queue: Arc::clone(queue),
        }
    }

    /// Callbacks run on the blocking pool, never on this task.
    fn notify(&mut self, callback: Option<ConnectionCallback>, handle: SingleSubscriberPublisher) {
        if let Some(callback) = callback {
            self.callback_tasks.retain(|task| !task.is_finished());
            self.callback_tasks
                .push(tokio::task::spawn_blocking(move || callback(handle)));
        }
    }

    /// The listener is gone: retire the publisher so the topic can be
    /// advertised again.
    async fn abandon(&self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        owner.shut_down.store(true, Ordering::SeqCst);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(owner.topic(), &owner).await;
        }
    }

    fn publish_snapshot(&self) {
        let subscribers = self
            .sessions
            .values()
            .filter_map(|s| s.caller_id.clone())
            .collect();
        self.snapshot.send_replace(PublisherSnapshot { subscribers });
    }

    async fn teardown(&mut self) {
        let topic = self.params.topic.clone();
        debug!(topic = %topic, "Shutting down publisher");

        if let Some(quit) = self.accept_quit.take() {
            let _ = quit.send(());
        }
        // An accept loop blocked on a full channel must see it closed.
        self.accept_events.close();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }

        if let Err(e) = self.master.unregister_publisher(&topic).await {
            warn!(topic = %topic, "unregisterPublisher failed: {}", e);
        }

        for session in self.sessions.values_mut() {
            if let Some(quit) = session.quit.take() {
                let _ = quit.send(());
            }
        }
        // Sessions finishing now must not block on a full event channel.
        self.session_rx.close();

        let sessions: Vec<_> = self.sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            let _ = session.task.await;
            if let Some(caller_id) = session.caller_id {
                let handle = self.single_publisher(caller_id, &session.queue);
                self.notify(self.callbacks.on_disconnect.clone(), handle);
            }
        }
        self.publish_snapshot();
        for task in self.callback_tasks.drain(..) {
            let _ = task.await;
        }
        debug!(topic = %topic, "Publisher shut down");
    }
}

/// Byte-level handle on an advertised topic.
#[derive(Clone)]
pub struct RawPublisher {
    inner: Arc<TopicPublisher>,
    registry: Weak<Registry<TopicPublisher>>,
}

impl RawPublisher {
    pub(crate) fn new(inner: Arc<TopicPublisher>, registry: Weak<Registry<TopicPublisher>>) -> Self {
        Self { inner, registry }
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }

    pub fn message_type(&self) -> &MessageType {
        self.inner.message_type()
    }

    /// Queue an already serialized message.
    pub fn publish(&self, payload: impl Into<Arc<[u8]>>) -> Result<()> {
        self.inner.publish(payload.into())
    }

    pub fn num_subscribers(&self) -> usize {
        self.inner.num_subscribers()
    }

    /// Shut the topic down and drop it from the node.
    pub async fn shutdown(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(self.inner.topic(), &self.inner).await;
        }
        self.inner.shutdown().await;
    }
}

/// Typed handle on an advertised topic.
pub struct Publisher<T> {
    raw: RawPublisher,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: RosMessage> Publisher<T> {
    pub(crate) fn new(raw: RawPublisher) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn publish(&self, msg: &T) -> Result<()> {
        self.raw.publish(msg.to_bytes())
    }

    pub fn topic(&self) -> &str {
        self.raw.topic()
    }

    pub fn num_subscribers(&self) -> usize {
        self.raw.num_subscribers()
    }

    pub fn raw(&self) -> &RawPublisher {
        &self.raw
    }

    pub async fn shutdown(&self) {
        self.raw.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::std_msgs::StringMsg;
    use crate::xmlrpc::XmlRpcClient;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn setup(registry: &Arc<Registry<TopicPublisher>>) -> Setup {
        let rpc = XmlRpcClient::new(Duration::from_millis(200)).unwrap();
        Setup {
            topic: "/chatter".to_string(),
            msg_type: StringMsg::message_type(),
            local_addr: "127.0.0.1:9".parse().unwrap(),
            callbacks: PublisherCallbacks::default(),
            master: MasterClient::new(rpc, "http://127.0.0.1:1/", "/talker", "http://127.0.0.1:2/"),
            registry: Arc::downgrade(registry),
        }
    }

    fn listener_error() -> AcceptEvent {
        AcceptEvent::Failed(io::Error::new(io::ErrorKind::Other, "listener gone"))
    }

    #[tokio::test]
    async fn test_listener_failure_retires_publisher() {
        let registry = Arc::new(Registry::new());
        let (events_tx, events_rx) = mpsc::channel(16);
        let (quit_tx, _quit_rx) = oneshot::channel();
        let accept = AcceptSource {
            events: events_rx,
            quit: quit_tx,
            task: tokio::spawn(async {}),
        };
        let (publisher, control) =
            TopicPublisher::launch(setup(&registry), &TransportConfig::default(), accept);
        registry
            .write()
            .await
            .insert("/chatter".to_string(), Arc::clone(&publisher));

        events_tx.send(listener_error()).await.unwrap();
        timeout(WAIT, control).await.unwrap().unwrap();

        assert!(publisher.is_shut_down());
        assert!(registry.get("/chatter").await.is_none());
        assert!(matches!(
            publisher.publish(Arc::from(&b"late"[..])),
            Err(Error::Shutdown(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_on_blocked_accept_loop() {
        let registry = Arc::new(Registry::new());
        let (events_tx, events_rx) = mpsc::channel(16);
        let (quit_tx, quit_rx) = oneshot::channel::<()>();
        // Keeps pushing after being told to quit, well past the channel size.
        let task = tokio::spawn(async move {
            let _ = quit_rx.await;
            for _ in 0..64 {
                if events_tx.send(listener_error()).await.is_err() {
                    return;
                }
            }
        });
        let accept = AcceptSource {
            events: events_rx,
            quit: quit_tx,
            task,
        };
        let (publisher, control) =
            TopicPublisher::launch(setup(&registry), &TransportConfig::default(), accept);

        timeout(WAIT, publisher.shutdown()).await.unwrap();
        timeout(WAIT, control).await.unwrap().unwrap();
        assert_eq!(publisher.num_subscribers(), 0);
    }
}
