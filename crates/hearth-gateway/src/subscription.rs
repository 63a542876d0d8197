use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Shared flag a delivery task checks before every callback.
#[derive(Clone, Debug)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to a running delivery task.
///
/// Cancelling (or dropping) the handle stops delivery: the liveness flag is
/// cleared first so no further callback starts, then the task is aborted.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    live: Liveness,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn `deliver` on the runtime. It receives the liveness flag to
    /// consult before invoking user callbacks.
    pub fn spawn<F, Fut>(deliver: F) -> Self
    where
        F: FnOnce(Liveness) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let live = Liveness(Arc::new(AtomicBool::new(true)));
        let task = tokio::spawn(deliver(live.clone()));
        Self {
            live,
            task: Some(task),
        }
    }

    /// Invoke `callback` for every item on `rx`, in arrival order.
    pub fn forward<T, F>(mut rx: broadcast::Receiver<T>, callback: F) -> Self
    where
        T: Clone + Send + 'static,
        F: Fn(T) + Send + 'static,
    {
        Self::spawn(move |live| async move {
            loop {
                let item = match rx.recv().await {
                    Ok(item) => item,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Subscriber lagged by {} events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !live.is_live() {
                    break;
                }
                callback(item);
            }
        })
    }

    pub fn is_active(&self) -> bool {
        self.live.is_live() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.live.0.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
