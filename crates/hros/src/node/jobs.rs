// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The node's serialized job queue.
//!
//! Every user callback and every topology update is posted here and run by
//! whichever task is spinning the node, one job at a time.

use crate::error::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::error;

/// A deferred action run by the node's single consumer.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Producer side, cloned into every task that defers work.
#[derive(Clone)]
pub(crate) struct JobSender {
    tx: mpsc::Sender<Job>,
}

impl JobSender {
    /// Wait for room in the queue, failing once it is closed.
    pub async fn send(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| Error::Shutdown("job queue".into()))
    }

    pub fn try_send(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Protocol("job queue is full".into()),
            mpsc::error::TrySendError::Closed(_) => Error::Shutdown("job queue".into()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side. The receiver lock makes concurrent spinners take turns.
pub(crate) struct JobQueue {
    rx: Mutex<mpsc::Receiver<Job>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (JobSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (JobSender { tx }, Self { rx: Mutex::new(rx) })
    }

    /// Run one job, waiting at most `idle` for it. Returns whether a job ran.
    pub async fn run_one(&self, idle: Duration) -> bool {
        // Held while the job runs so other spinners wait their turn.
        let mut rx = self.rx.lock().await;
        let job = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) | Err(_) => return false,
        };
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Job panicked; continuing");
        }
        true
    }

    /// Refuse new jobs; already queued ones can still be drained.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }
}
