// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic subscription.
//!
//! A [`TopicSubscriber`] keeps one link per known publisher address. Its
//! control task owns the link set and reconciles it against the latest
//! address list: links for vanished addresses are closed, new addresses get
//! a link, the rest are left alone. A link that fails is dropped and only
//! retried when a later update lists its address again.

mod connection;

use crate::error::{Error, Result};
use crate::master::MasterClient;
use crate::message::{MessageEvent, MessageType, RosMessage};
use crate::node::jobs::JobSender;
use crate::node::registry::Registry;
use crate::xmlrpc::XmlRpcClient;
use connection::{LinkEvent, LinkId, LinkParams};
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Byte-level message callback.
pub type RawCallback = Arc<dyn Fn(&[u8], &MessageEvent) + Send + Sync>;

pub(crate) type CallbackList = Arc<parking_lot::RwLock<Vec<(u64, RawCallback)>>>;

/// Read-only view of the subscriber's links.
#[derive(Debug, Clone, Default)]
pub struct SubscriberSnapshot {
    /// Publisher slave URIs from the latest update.
    pub publishers: Vec<String>,
    /// Links past the handshake.
    pub connected: usize,
}

enum Command {
    Shutdown(oneshot::Sender<()>),
}

/// The per-topic subscription engine.
pub struct TopicSubscriber {
    topic: String,
    msg_type: MessageType,
    callbacks: CallbackList,
    next_callback: AtomicU64,
    updates: watch::Sender<Vec<String>>,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SubscriberSnapshot>,
    registry: Weak<Registry<TopicSubscriber>>,
    shut_down: AtomicBool,
}

pub(crate) struct SubscriberEnv {
    pub caller_id: String,
    pub rpc: XmlRpcClient,
    pub master: MasterClient,
    pub jobs: JobSender,
    pub registry: Weak<Registry<TopicSubscriber>>,
}

impl TopicSubscriber {
    /// Register with the master and start the control task with the
    /// returned publisher list.
    pub(crate) async fn start(
        topic: String,
        msg_type: MessageType,
        callback: RawCallback,
        env: SubscriberEnv,
    ) -> Result<(Arc<Self>, u64, JoinHandle<()>)> {
        let publishers = env
            .master
            .register_subscriber(&topic, msg_type.name())
            .await?;
        debug!(topic = %topic, "Registered subscriber; publishers: {:?}", publishers);

        let callbacks: CallbackList = Arc::new(parking_lot::RwLock::new(vec![(0, callback)]));
        let (updates_tx, updates_rx) = watch::channel(publishers);
        let (commands_tx, commands_rx) = mpsc::channel(4);
        let (snapshot_tx, snapshot_rx) = watch::channel(SubscriberSnapshot::default());
        let (link_tx, link_rx) = mpsc::channel(64);

        let control = ControlTask {
            params: Arc::new(LinkParams {
                topic: topic.clone(),
                caller_id: env.caller_id,
                type_name: msg_type.name().to_string(),
                md5sum: msg_type.md5sum().to_string(),
                definition: msg_type.definition().to_string(),
                rpc: env.rpc,
                jobs: env.jobs,
                callbacks: Arc::clone(&callbacks),
            }),
            master: env.master,
            updates: updates_rx,
            commands: commands_rx,
            link_tx,
            link_rx,
            links: HashMap::new(),
            retired: Vec::new(),
            next_id: 0,
            addresses: Vec::new(),
            snapshot: snapshot_tx,
        };
        let handle = tokio::spawn(control.run());

        info!(topic = %topic, "Subscribed as {}", msg_type.name());
        let subscriber = Arc::new(Self {
            topic,
            msg_type,
            callbacks,
            next_callback: AtomicU64::new(1),
            updates: updates_tx,
            commands: commands_tx,
            snapshot: snapshot_rx,
            registry: env.registry,
            shut_down: AtomicBool::new(false),
        });
        Ok((subscriber, 0, handle))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn message_type(&self) -> &MessageType {
        &self.msg_type
    }

    /// Append a listener; returns its id.
    pub(crate) fn add_callback(&self, callback: RawCallback) -> u64 {
        let id = self.next_callback.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().push((id, callback));
        id
    }

    pub(crate) fn remove_callback(&self, id: u64) {
        self.callbacks.write().retain(|(cid, _)| *cid != id);
    }

    pub fn num_callbacks(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Replace the publisher address set; applied asynchronously.
    pub fn update_publishers(&self, publishers: Vec<String>) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::Shutdown(format!("subscriber {}", self.topic)));
        }
        debug!(topic = %self.topic, "Publisher update: {:?}", publishers);
        self.updates.send_replace(publishers);
        Ok(())
    }

    /// Links past the handshake.
    pub fn num_publishers(&self) -> usize {
        self.snapshot.borrow().connected
    }

    pub fn snapshot(&self) -> SubscriberSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Disconnect every publisher, unregister, leave the node's registry.
    /// Only the first call has an effect.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(&self.topic, self).await;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

struct LinkHandle {
    id: LinkId,
    quit: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    connected: bool,
}

struct ControlTask {
    params: Arc<LinkParams>,
    master: MasterClient,
    updates: watch::Receiver<Vec<String>>,
    commands: mpsc::Receiver<Command>,
    link_tx: mpsc::Sender<LinkEvent>,
    link_rx: mpsc::Receiver<LinkEvent>,
    links: HashMap<String, LinkHandle>,
    /// Links told to quit by a reconciliation, awaited at teardown.
    retired: Vec<JoinHandle<()>>,
    next_id: LinkId,
    addresses: Vec<String>,
    snapshot: watch::Sender<SubscriberSnapshot>,
}

impl ControlTask {
    async fn run(mut self) {
        let initial = self.updates.borrow_and_update().clone();
        self.reconcile(initial);

        let mut ack = None;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        ack = Some(done);
                        break;
                    }
                    None => break,
                },
                changed = self.updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = self.updates.borrow_and_update().clone();
                    self.reconcile(latest);
                }
                Some(event) = self.link_rx.recv() => self.on_link_event(event),
            }
        }

        self.teardown().await;
        if let Some(done) = ack {
            let _ = done.send(());
        }
    }

    fn reconcile(&mut self, publishers: Vec<String>) {
        let wanted: BTreeSet<&str> = publishers.iter().map(String::as_str).collect();

        let stale: Vec<String> = self
            .links
            .keys()
            .filter(|uri| !wanted.contains(uri.as_str()))
            .cloned()
            .collect();
        for uri in stale {
            if let Some(mut link) = self.links.remove(&uri) {
                debug!(topic = %self.params.topic, "Disconnecting from {}", uri);
                if let Some(quit) = link.quit.take() {
                    let _ = quit.send(());
                }
                self.retired.push(link.task);
            }
        }
        self.retired.retain(|task| !task.is_finished());

        for uri in wanted {
            if !self.links.contains_key(uri) {
                self.spawn_link(uri.to_string());
            }
        }

        self.addresses = publishers;
        self.publish_snapshot();
    }

    fn spawn_link(&mut self, uri: String) {
        let id = self.next_id;
        self.next_id += 1;
        let (quit_tx, quit_rx) = oneshot::channel();
        let params = Arc::clone(&self.params);
        let events = self.link_tx.clone();
        let link_uri = uri.clone();

        let task = tokio::spawn(async move {
            let result = connection::run(id, &link_uri, &params, quit_rx, &events).await;
            let _ = events.send(LinkEvent::Closed { id, result }).await;
        });

        self.links.insert(
            uri,
            LinkHandle {
                id,
                quit: Some(quit_tx),
                task,
                connected: false,
            },
        );
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { id } => {
                if let Some(link) = self.links.values_mut().find(|l| l.id == id) {
                    link.connected = true;
                    debug!(topic = %self.params.topic, link = id, "Connected to publisher");
                }
            }
            LinkEvent::Closed { id, result } => {
                let uri = self
                    .links
                    .iter()
                    .find(|(_, l)| l.id == id)
                    .map(|(uri, _)| uri.clone());
                if let Some(uri) = uri {
                    self.links.remove(&uri);
                    match result {
                        Ok(()) => debug!(topic = %self.params.topic, "Link to {} closed", uri),
                        Err(e) => warn!(topic = %self.params.topic, "Link to {} failed: {}", uri, e),
                    }
                }
            }
        }
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let connected = self.links.values().filter(|l| l.connected).count();
        self.snapshot.send_replace(SubscriberSnapshot {
            publishers: self.addresses.clone(),
            connected,
        });
    }

    async fn teardown(&mut self) {
        let topic = self.params.topic.clone();
        debug!(topic = %topic, "Shutting down subscriber");

        for link in self.links.values_mut() {
            if let Some(quit) = link.quit.take() {
                let _ = quit.send(());
            }
        }
        self.link_rx.close();
        let links: Vec<_> = self.links.drain().map(|(_, l)| l).collect();
        for link in links {
            let _ = link.task.await;
        }
        for task in self.retired.drain(..) {
            let _ = task.await;
        }

        if let Err(e) = self.master.unregister_subscriber(&topic).await {
            warn!(topic = %topic, "unregisterSubscriber failed: {}", e);
        }
        self.addresses.clear();
        self.publish_snapshot();
        debug!(topic = %topic, "Subscriber shut down");
    }
}

/// How a [`Subscriber`] handle relates to its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// First subscription for the topic; owns the master registration.
    Registered,
    /// A further callback on an already registered topic.
    AdditionalListener,
}

/// Handle returned by the node's `subscribe*` calls.
pub struct Subscriber<T = ()> {
    inner: Arc<TopicSubscriber>,
    kind: SubscriptionKind,
    callback_id: u64,
    _marker: PhantomData<fn(T)>,
}

impl<T> Subscriber<T> {
    pub(crate) fn new(inner: Arc<TopicSubscriber>, kind: SubscriptionKind, callback_id: u64) -> Self {
        Self {
            inner,
            kind,
            callback_id,
            _marker: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn num_publishers(&self) -> usize {
        self.inner.num_publishers()
    }

    pub fn snapshot(&self) -> SubscriberSnapshot {
        self.inner.snapshot()
    }

    /// A registered handle tears the whole topic down; an additional
    /// listener only removes its own callback.
    pub async fn shutdown(&self) {
        match self.kind {
            SubscriptionKind::Registered => self.inner.shutdown().await,
            SubscriptionKind::AdditionalListener => self.inner.remove_callback(self.callback_id),
        }
    }
}

/// Wrap a typed callback into a raw one that decodes first.
pub(crate) fn typed_callback<T, F>(topic: &str, f: F) -> RawCallback
where
    T: RosMessage,
    F: Fn(T, &MessageEvent) + Send + Sync + 'static,
{
    let topic = topic.to_string();
    Arc::new(move |bytes: &[u8], event: &MessageEvent| match T::decode(bytes) {
        Ok(msg) => f(msg, event),
        Err(e) => warn!(topic = %topic, "Dropping undecodable message: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::std_msgs::StringMsg;
    use crate::tcpros::ConnectionHeader;
    use std::time::SystemTime;

    fn event() -> MessageEvent {
        MessageEvent {
            publisher_name: "/talker".into(),
            receipt_time: SystemTime::now(),
            connection_header: ConnectionHeader::new(),
        }
    }

    #[test]
    fn test_typed_callback_decodes() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = typed_callback::<StringMsg, _>("/chatter", move |msg, ev| {
            sink.lock().push((msg.data, ev.publisher_name.clone()));
        });

        callback(&StringMsg::new("hi").to_bytes(), &event());
        callback(&[1, 2], &event());
        assert_eq!(*seen.lock(), [("hi".to_string(), "/talker".to_string())]);
    }
}
