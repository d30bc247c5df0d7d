//! Serialized execution of device writes
//!
//! One queue per physical device. Jobs run strictly one after another in
//! submission order; a failing job only fails its own submitter.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::QueueError;

type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct QueuedJob {
    class_name: Option<String>,
    job: Job,
    done: oneshot::Sender<anyhow::Result<()>>,
}

struct QueueState {
    jobs: VecDeque<QueuedJob>,
    running: bool,
    started: bool,
}

/// FIFO of async jobs with optional class tags
#[derive(Clone)]
pub struct SendQueue {
    state: Arc<Mutex<QueueState>>,
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SendQueue {
    /// Queue that starts draining as soon as a job is added
    pub fn new() -> Self {
        Self::with_auto_start(true)
    }

    /// Queue that holds jobs until [`start`](Self::start) is called
    pub fn paused() -> Self {
        Self::with_auto_start(false)
    }

    pub fn with_auto_start(auto_start: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                jobs: VecDeque::new(),
                running: false,
                started: auto_start,
            })),
        }
    }

    /// Enqueue a job. It is queued immediately; the returned future resolves
    /// with the job's own outcome, or `Discarded` if it was removed before it ran.
    pub fn add<F>(
        &self,
        job: F,
        class_name: Option<&str>,
    ) -> impl Future<Output = Result<(), QueueError>> + Send + 'static
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        self.state.lock().jobs.push_back(QueuedJob {
            class_name: class_name.map(str::to_string),
            job: Box::pin(job),
            done,
        });
        self.kick();

        async move {
            match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(QueueError::Failed(e)),
                Err(_) => Err(QueueError::Discarded),
            }
        }
    }

    /// Drop pending jobs tagged `class_name`. The job in flight is untouched.
    pub fn remove(&self, class_name: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state
            .jobs
            .retain(|queued| queued.class_name.as_deref() != Some(class_name));
        let removed = before - state.jobs.len();
        if removed > 0 {
            trace!("SendQueue: discarded {} pending job(s) of class {}", removed, class_name);
        }
        removed
    }

    /// Drop every pending job
    pub fn clear(&self) {
        self.state.lock().jobs.clear();
    }

    /// Begin draining a paused queue
    pub fn start(&self) {
        self.state.lock().started = true;
        self.kick();
    }

    /// Jobs waiting to run (excludes the one in flight)
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// No job pending and none in flight
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.running && state.jobs.is_empty()
    }

    fn kick(&self) {
        {
            let mut state = self.state.lock();
            if !state.started || state.running || state.jobs.is_empty() {
                return;
            }
            state.running = true;
        }
        tokio::spawn(drain(self.state.clone()));
    }
}

async fn drain(state: Arc<Mutex<QueueState>>) {
    loop {
        let next = {
            let mut state = state.lock();
            match state.jobs.pop_front() {
                Some(next) => next,
                None => {
                    state.running = false;
                    return;
                }
            }
        };

        // Own task so a panicking job fails alone
        let result = match tokio::spawn(next.job).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("queued job aborted: {}", e)),
        };
        let _ = next.done.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn step(log: &Log, entry: &'static str) {
        log.lock().push(entry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_queue() {
        let queue = SendQueue::new();
        let log: Log = Arc::default();

        let l = log.clone();
        let j1 = queue.add(
            async move {
                step(&l, "j1");
                Ok(())
            },
            None,
        );
        let l = log.clone();
        let j2 = queue.add(
            async move {
                step(&l, "j2 start");
                tokio::time::sleep(Duration::from_millis(20)).await;
                step(&l, "j2 end");
                Err(anyhow::anyhow!("write failed"))
            },
            None,
        );
        let l = log.clone();
        let j3 = queue.add(
            async move {
                step(&l, "j3");
                Ok(())
            },
            None,
        );

        assert!(j1.await.is_ok());
        let err = j2.await.unwrap_err();
        assert!(matches!(err, QueueError::Failed(_)));
        assert!(err.to_string().contains("write failed"));
        assert!(j3.await.is_ok());

        assert_eq!(*log.lock(), vec!["j1", "j2 start", "j2 end", "j3"]);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_remove_only_pending() {
        let queue = SendQueue::new();
        let (release, gate) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let in_flight = queue.add(
            async move {
                let _ = started_tx.send(());
                let _ = gate.await;
                Ok(())
            },
            Some("k1"),
        );
        started_rx.await.unwrap();

        let pending_k1 = queue.add(async { Ok(()) }, Some("k1"));
        let pending_k2 = queue.add(async { Ok(()) }, Some("k2"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.remove("k1"), 1);
        release.send(()).unwrap();

        assert!(in_flight.await.is_ok());
        assert!(pending_k1.await.unwrap_err().is_discarded());
        assert!(pending_k2.await.is_ok());
    }

    #[tokio::test]
    async fn test_paused_until_started() {
        let queue = SendQueue::paused();
        let log: Log = Arc::default();

        let l = log.clone();
        let a = queue.add(
            async move {
                step(&l, "a");
                Ok(())
            },
            Some("x"),
        );
        let l = log.clone();
        let b = queue.add(
            async move {
                step(&l, "b");
                Ok(())
            },
            Some("y"),
        );

        tokio::task::yield_now().await;
        assert!(log.lock().is_empty());
        assert_eq!(queue.len(), 2);

        queue.remove("x");
        queue.start();

        assert!(a.await.unwrap_err().is_discarded());
        assert!(b.await.is_ok());
        assert_eq!(*log.lock(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_clear_discards_everything_pending() {
        let queue = SendQueue::paused();
        let a = queue.add(async { Ok(()) }, None);
        let b = queue.add(async { Ok(()) }, Some("k"));

        queue.clear();
        assert!(queue.is_empty());
        assert!(a.await.unwrap_err().is_discarded());
        assert!(b.await.unwrap_err().is_discarded());
    }

    #[tokio::test]
    async fn test_panicking_job_fails_alone() {
        let queue = SendQueue::new();
        let bad = queue.add(
            async {
                let outcome: Result<(), &str> = Err("boom");
                outcome.unwrap();
                Ok(())
            },
            None,
        );
        let good = queue.add(async { Ok(()) }, None);

        assert!(matches!(bad.await, Err(QueueError::Failed(_))));
        assert!(good.await.is_ok());
    }
}
