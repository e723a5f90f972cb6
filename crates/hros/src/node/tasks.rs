// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background task tracking for the shutdown barrier.

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Default)]
pub(crate) struct TaskGroup {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle`, forgetting tasks that already finished.
    pub fn push(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Await every tracked task, including ones added while waiting.
    pub async fn wait(&self) {
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                let _ = handle.await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_joins_all() {
        let group = TaskGroup::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        group.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        }));
        assert_eq!(group.len(), 1);
        group.wait().await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(group.len(), 0);
    }

    #[tokio::test]
    async fn test_push_prunes_finished_tasks() {
        let group = TaskGroup::new();
        for _ in 0..3 {
            group.push(tokio::spawn(async {}));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (release, held) = tokio::sync::oneshot::channel::<()>();
        group.push(tokio::spawn(async move {
            let _ = held.await;
        }));
        assert_eq!(group.len(), 1);
        let _ = release.send(());
        group.wait().await;
    }
}
