//! Per-key serialized task execution over a shared worker pool.
//!
//! Tasks submitted under the same key run one at a time in submission order.
//! Tasks under different keys run concurrently, bounded by the worker count.
//! A single poll loop advances every key's pipeline on a fixed interval.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Worker count and poll interval of a [`PipeliningTaskQueue`].
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub workers: usize,
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

type Task = BoxFuture<'static, ()>;

#[derive(Default)]
struct Pipeline {
    waiting: VecDeque<Task>,
    /// The submitted head task.
    head: Option<JoinHandle<()>>,
}

impl Pipeline {
    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.head.is_none()
    }

    fn pending(&self) -> usize {
        self.waiting.len() + usize::from(self.head.is_some())
    }
}

struct Inner<K> {
    pipelines: Mutex<HashMap<K, Arc<Mutex<Pipeline>>>>,
    permits: Arc<Semaphore>,
    runtime: Handle,
}

impl<K> Inner<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// One scheduler pass over every pipeline.
    fn poll(&self) {
        let snapshot: Vec<(K, Arc<Mutex<Pipeline>>)> = {
            let Ok(pipelines) = self.pipelines.lock() else {
                tracing::warn!("Failed to acquire pipeline map lock");
                return;
            };
            pipelines.iter().map(|(k, p)| (k.clone(), p.clone())).collect()
        };

        for (key, pipeline) in &snapshot {
            let Ok(mut pipeline) = pipeline.lock() else {
                tracing::warn!(key = ?key, "Failed to acquire pipeline lock");
                continue;
            };
            self.advance(key, &mut pipeline);
        }

        self.prune();
    }

    fn advance(&self, key: &K, pipeline: &mut Pipeline) {
        if pipeline.head.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(finished) = pipeline.head.take() {
                if let Some(Err(e)) = finished.now_or_never() {
                    tracing::warn!(key = ?key, "Pipelined task failed: {}", e);
                }
            }
        }

        if pipeline.head.is_none() {
            if let Some(task) = pipeline.waiting.pop_front() {
                pipeline.head = Some(self.submit(task));
            }
        }
    }

    fn submit(&self, task: Task) -> JoinHandle<()> {
        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            task.await;
        })
    }

    fn prune(&self) {
        let Ok(mut pipelines) = self.pipelines.lock() else {
            return;
        };
        pipelines.retain(|_, pipeline| match pipeline.lock() {
            Ok(p) => !p.is_idle(),
            Err(_) => true,
        });
    }
}

/// Runs at most one task per key at a time, in per-key submission order.
///
/// Failed and panicked tasks count as done: their key moves on to the next
/// task. There is no timeout or cancellation of a submitted task.
pub struct PipeliningTaskQueue<K> {
    inner: Arc<Inner<K>>,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<K> PipeliningTaskQueue<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(runtime: Handle) -> Self {
        Self::with_config(runtime, QueueConfig::default())
    }

    pub fn with_config(runtime: Handle, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipelines: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(config.workers.max(1))),
                runtime,
            }),
            poll_interval: config.poll_interval,
            poller: Mutex::new(None),
        }
    }

    /// Starts the poll loop. Calling it again while running does nothing.
    pub fn start(&self) {
        let Ok(mut poller) = self.poller.lock() else {
            tracing::warn!("Failed to acquire poller lock");
            return;
        };
        if poller.as_ref().is_some_and(|p| !p.is_finished()) {
            return;
        }

        let inner = self.inner.clone();
        let period = self.poll_interval;
        *poller = Some(self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.poll();
            }
        }));
        tracing::debug!(interval_ms = period.as_millis() as u64, "Pipelining queue started");
    }

    /// Stops the poll loop. Running tasks finish; waiting tasks stay queued
    /// until the queue is started again.
    pub fn stop(&self) {
        let Ok(mut poller) = self.poller.lock() else {
            return;
        };
        if let Some(handle) = poller.take() {
            handle.abort();
            tracing::debug!("Pipelining queue stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.poller
            .lock()
            .map(|p| p.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Queues `task` behind every task already queued under `key`.
    pub fn execute<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut pipelines) = self.inner.pipelines.lock() else {
            tracing::warn!(key = ?key, "Failed to acquire pipeline map lock, task dropped");
            return;
        };
        let pipeline = pipelines.entry(key).or_default();
        let Ok(mut pipeline) = pipeline.lock() else {
            tracing::warn!("Failed to acquire pipeline lock, task dropped");
            return;
        };
        pipeline.waiting.push_back(task.boxed());
    }

    /// Drops the tasks waiting under `key`. A task already running is left
    /// to finish.
    pub fn clear(&self, key: &K) {
        let Ok(pipelines) = self.inner.pipelines.lock() else {
            return;
        };
        let Some(pipeline) = pipelines.get(key) else {
            return;
        };
        let Ok(mut pipeline) = pipeline.lock() else {
            tracing::warn!(key = ?key, "Failed to acquire pipeline lock, nothing cleared");
            return;
        };
        let dropped = pipeline.waiting.len();
        pipeline.waiting.clear();
        tracing::debug!(key = ?key, dropped, "Cleared pipeline");
    }

    /// Tasks under `key` that have not yet been seen to complete.
    pub fn pending(&self, key: &K) -> usize {
        let Ok(pipelines) = self.inner.pipelines.lock() else {
            return 0;
        };
        pipelines
            .get(key)
            .and_then(|p| p.lock().ok().map(|p| p.pending()))
            .unwrap_or(0)
    }

    /// Number of keys with queued or running work.
    pub fn active_keys(&self) -> usize {
        self.inner.pipelines.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl<K> Drop for PipeliningTaskQueue<K> {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
    }
}
