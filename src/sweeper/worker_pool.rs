use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Bounded set of in-flight units. A slot is taken before a unit is created,
/// so a caller that cannot get one simply waits.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    tasks: JoinSet<()>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            tasks: JoinSet::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for a free slot. Returns `None` once `shutdown` fires.
    pub async fn acquire(&mut self, shutdown: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        self.reap();
        tokio::select! {
            _ = shutdown.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => permit.ok(),
        }
    }

    /// Runs `unit` in the slot held by `permit`; the slot frees when the
    /// unit finishes.
    pub fn spawn<F>(&mut self, permit: OwnedSemaphorePermit, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            let _permit = permit;
            unit.await;
        });
    }

    /// Waits for every in-flight unit.
    pub async fn drain(&mut self) {
        if !self.tasks.is_empty() {
            info!("Waiting for {} in-flight units", self.tasks.len());
        }
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
    }
}
