//! Pull-style iteration over a watch
//!
//! `Cluster::watch` pushes objects into a consumer. [`Watcher::iter`] runs
//! that push loop on one background task and hands objects over a
//! capacity-one channel, so the caller pulls them with [`WatchIter::next`]
//! and stops the watch with [`WatchIter::done`]:
//!
//! ```ignore
//! let mut iter = Watcher::new(cluster, "Deployment", "web", Options::new()).iter();
//! while let Some(object) = iter.next().await {
//!     if rollout::evaluate(&object).is_complete() {
//!         iter.done();
//!     }
//! }
//! iter.join().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::Shared;
use kdo_core::{Cluster, CoreError, Object, ObjectConsumer, ObjectStream, Options, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Lifecycle of a watch iterator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Open,
    Cancelled,
}

/// A watch on one named object
#[derive(Clone)]
pub struct Watcher {
    cluster: Arc<dyn Cluster>,
    kind: String,
    name: String,
    options: Options,
}

impl Watcher {
    pub fn new(cluster: Arc<dyn Cluster>, kind: &str, name: &str, options: Options) -> Self {
        Self {
            cluster,
            kind: kind.to_string(),
            name: name.to_string(),
            options,
        }
    }

    /// Start the background watch task
    pub fn iter(&self) -> WatchIter {
        let stream = self.cluster.watch(&self.kind, &self.name, &self.options);
        WatchIter::spawn(stream, format!("{}/{}", self.kind, self.name))
    }
}

struct Handoff {
    sender: mpsc::Sender<Object>,
    cancelled: Shared<oneshot::Receiver<()>>,
}

#[async_trait]
impl ObjectConsumer for Handoff {
    async fn accept(&mut self, object: Object) -> Result<()> {
        if self.cancelled.peek().is_some() {
            return Err(CoreError::StreamCancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled.clone() => Err(CoreError::StreamCancelled),
            sent = self.sender.send(object) => sent.map_err(|_| CoreError::StreamCancelled),
        }
    }
}

/// Objects observed by a watch, one at a time
#[derive(Debug)]
pub struct WatchIter {
    receiver: mpsc::Receiver<Object>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
    state: WatchState,
}

impl WatchIter {
    /// Drain `stream` on a background task, one object ahead of the caller
    fn spawn(stream: ObjectStream, target: String) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        let (cancel, cancelled) = oneshot::channel();
        let cancelled = cancelled.shared();

        let mut handoff = Handoff {
            sender,
            cancelled: cancelled.clone(),
        };
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancelled => Err(CoreError::StreamCancelled),
                result = stream.drain(&mut handoff) => result,
            };
            tracing::debug!(watch = %target, cancelled = matches!(result, Err(CoreError::StreamCancelled)), "watch task finished");
            result
        });

        Self {
            receiver,
            cancel: Some(cancel),
            task: Some(task),
            state: WatchState::Open,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// The next observed object, or `None` once the watch ended or was
    /// cancelled
    pub async fn next(&mut self) -> Option<Object> {
        match self.state {
            WatchState::Cancelled => None,
            WatchState::Open => self.receiver.recv().await,
        }
    }

    /// Stop the watch. No object is delivered afterwards.
    pub fn done(&mut self) {
        if self.state == WatchState::Cancelled {
            return;
        }
        self.state = WatchState::Cancelled;
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.receiver.close();
    }

    /// Wait for the background task. Objects not yet pulled are discarded;
    /// cancellation counts as success.
    pub async fn join(mut self) -> Result<()> {
        self.receiver.close();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(Err(CoreError::StreamCancelled)) => Ok(()),
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(CoreError::Cluster {
                message: format!("watch task failed: {}", e),
            }),
        }
    }
}

impl Drop for WatchIter {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
