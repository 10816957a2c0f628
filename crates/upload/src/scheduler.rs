//! Bounded-concurrency task pool with batch completion tracking.
//!
//! A single semaphore caps how many tasks run at once across every batch
//! submitted to the scheduler.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error};

const EVENT_CAPACITY: usize = 64;

/// Published on the scheduler's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task returned an error or panicked. Siblings keep running.
    TaskFailed { index: usize, error: String },
    BatchCompleted { total: usize },
    /// No task is queued or running.
    Drained,
}

/// Why a task produced no value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    #[error("task failed: {0}")]
    Failed(E),
    #[error("task panicked: {0}")]
    Panicked(String),
}

type Callback = Box<dyn FnOnce() + Send>;

/// Counts completed tasks and fires its callback exactly once, when the
/// count reaches the total.
pub struct Batch {
    total: usize,
    completed: AtomicUsize,
    on_complete: Mutex<Option<Callback>>,
}

impl Batch {
    pub fn new(total: usize, on_complete: impl FnOnce() + Send + 'static) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        }
    }

    /// Records one finished task. Returns `true` for the call that completed
    /// the batch.
    pub fn update(&self) -> bool {
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if done != self.total {
            return false;
        }
        let callback = self.on_complete.lock().unwrap().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire).min(self.total)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.total
    }
}

/// Runs batches of async work with a queue-wide concurrency ceiling.
pub struct UploadScheduler {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    /// Queued plus running tasks.
    outstanding: Arc<watch::Sender<usize>>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl UploadScheduler {
    /// `max_concurrent` is raised to 1 if zero.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            outstanding: Arc::new(watch::Sender::new(0)),
            events,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Tasks queued or running.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Resolves once no task is queued or running.
    pub async fn wait_drained(&self) {
        let mut rx = self.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Runs `worker` on every item and returns the outcomes in item order.
    ///
    /// A failing or panicking task never affects its siblings. Dropping the
    /// returned future aborts every task of the batch.
    pub async fn run_batch<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        worker: F,
    ) -> Vec<Result<T, TaskError<E>>>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let total = items.len();
        let batch_events = self.events.clone();
        let batch = Arc::new(Batch::new(total, move || {
            let _ = batch_events.send(SchedulerEvent::BatchCompleted { total });
        }));
        self.outstanding.send_modify(|n| *n += total);
        debug!(total, max_concurrent = self.max_concurrent, "batch queued");

        let worker = Arc::new(worker);
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let worker = Arc::clone(&worker);
            let batch = Arc::clone(&batch);
            let slot = OutstandingSlot {
                outstanding: Arc::clone(&self.outstanding),
                events: self.events.clone(),
            };
            let events = self.events.clone();

            tasks.spawn(async move {
                let outcome = {
                    // The semaphore is never closed.
                    let _permit = permits.acquire_owned().await;
                    let run = AssertUnwindSafe(async { (*worker)(item).await }).catch_unwind();
                    match run.await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(TaskError::Failed(e)),
                        Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
                    }
                };

                if let Err(e) = &outcome {
                    error!(index, error = %e, "task failed");
                    let _ = events.send(SchedulerEvent::TaskFailed {
                        index,
                        error: e.to_string(),
                    });
                }

                drop(slot);
                batch.update();
                (index, outcome)
            });
        }

        let mut results: Vec<Option<Result<T, TaskError<E>>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => results[index] = Some(outcome),
                // Workers run under catch_unwind; only an abort lands here.
                Err(join) => error!(error = %join, "task did not finish"),
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(TaskError::Panicked("task aborted".into()))))
            .collect()
    }
}

/// One queued or running task. Releases its count when dropped, including
/// when the task is aborted.
struct OutstandingSlot {
    outstanding: Arc<watch::Sender<usize>>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Drop for OutstandingSlot {
    fn drop(&mut self) {
        let mut drained = false;
        self.outstanding.send_modify(|n| {
            *n -= 1;
            drained = *n == 0;
        });
        if drained {
            let _ = self.events.send(SchedulerEvent::Drained);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Tracks how many workers are inside their critical section at once.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        async fn hold(&self, d: Duration) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(d).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_ceiling() {
        let scheduler = UploadScheduler::new(2);
        let gauge = Arc::new(Gauge::default());

        let g = Arc::clone(&gauge);
        let results = scheduler
            .run_batch((0..6).collect(), move |i: usize| {
                let g = Arc::clone(&g);
                async move {
                    g.hold(Duration::from_millis(20)).await;
                    Ok::<usize, String>(i * 10)
                }
            })
            .await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50]);
        assert_eq!(scheduler.outstanding(), 0);
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_is_shared_across_batches() {
        let scheduler = UploadScheduler::new(2);
        let gauge = Arc::new(Gauge::default());

        let worker = |g: Arc<Gauge>| {
            move |_: usize| {
                let g = Arc::clone(&g);
                async move {
                    g.hold(Duration::from_millis(10)).await;
                    Ok::<(), String>(())
                }
            }
        };
        let (a, b) = tokio::join!(
            scheduler.run_batch((0..4).collect(), worker(Arc::clone(&gauge))),
            scheduler.run_batch((0..4).collect(), worker(Arc::clone(&gauge))),
        );

        assert_eq!(a.len() + b.len(), 8);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let scheduler = UploadScheduler::new(3);
        let mut rx = scheduler.subscribe();

        let results = scheduler
            .run_batch(vec![0, 1, 2, 3], |i: u32| async move {
                if i == 2 { Err(format!("item {i} broke")) } else { Ok(i) }
            })
            .await;

        assert!(results[0].is_ok() && results[1].is_ok() && results[3].is_ok());
        assert!(matches!(&results[2], Err(TaskError::Failed(msg)) if msg == "item 2 broke"));

        let events = drain(&mut rx);
        assert!(events.contains(&SchedulerEvent::TaskFailed {
            index: 2,
            error: "task failed: item 2 broke".into(),
        }));
        assert!(events.contains(&SchedulerEvent::BatchCompleted { total: 4 }));
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let scheduler = UploadScheduler::new(2);

        let results = scheduler
            .run_batch(vec![0, 1, 2], |i: u32| async move {
                if i == 1 {
                    panic!("worker exploded");
                }
                Ok::<u32, String>(i)
            })
            .await;

        assert_eq!(results[0].as_ref().unwrap(), &0);
        assert!(matches!(
            &results[1],
            Err(TaskError::Panicked(msg)) if msg.contains("worker exploded")
        ));
        assert_eq!(results[2].as_ref().unwrap(), &2);
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_batch_aborts_its_tasks() {
        let scheduler = UploadScheduler::new(1);
        let started = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&started);
        let run = scheduler.run_batch((0..3).collect(), move |_: usize| {
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<(), String>(())
            }
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(150), run)
                .await
                .is_err()
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
        scheduler.wait_drained().await;
        assert_eq!(scheduler.outstanding(), 0);
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let scheduler = UploadScheduler::new(1);
        let mut rx = scheduler.subscribe();
        let results = scheduler
            .run_batch(Vec::<u8>::new(), |_| async { Ok::<(), String>(()) })
            .await;
        assert!(results.is_empty());
        assert!(drain(&mut rx).is_empty());
        scheduler.wait_drained().await;
    }

    #[tokio::test]
    async fn drained_fires_after_every_batch() {
        let scheduler = UploadScheduler::new(2);
        let mut rx = scheduler.subscribe();

        for _ in 0..2 {
            scheduler
                .run_batch(vec![1, 2, 3], |i: u32| async move { Ok::<u32, String>(i) })
                .await;
            scheduler.wait_drained().await;
        }

        let events = drain(&mut rx);
        let drained = events.iter().filter(|e| **e == SchedulerEvent::Drained).count();
        let batches = events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::BatchCompleted { total: 3 }))
            .count();
        assert_eq!(drained, 2);
        assert_eq!(batches, 2);
    }

    #[test]
    fn batch_callback_fires_once_under_racing_updates() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let batch = Arc::new(Batch::new(800, move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let batch = Arc::clone(&batch);
                std::thread::spawn(move || {
                    let mut completed_here = 0;
                    for _ in 0..100 {
                        if batch.update() {
                            completed_here += 1;
                        }
                    }
                    completed_here
                })
            })
            .collect();
        let completers: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(completers, 1);
        assert!(batch.is_complete());
        assert_eq!(batch.completed(), 800);
    }

    #[test]
    fn extra_updates_do_not_refire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let batch = Batch::new(1, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(batch.update());
        assert!(!batch.update());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(batch.total(), 1);
    }
}
