//! Batch prefetching on a rayon thread pool.
//!
//! Batches are built ahead of consumption by pool workers and handed back
//! through a reorder buffer, so the consumer always sees them in plan order
//! no matter which worker finishes first.

use crate::error::MlError;
use crate::loader::batch::Batch;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

/// Builds the batch at a given position of an epoch's plan.
pub(crate) trait BatchJob: Send + Sync + 'static {
    fn len(&self) -> usize;
    fn build(&self, index: usize) -> Result<Batch, MlError>;
}

/// Loader worker configuration plus the pool kept alive across epochs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    num_workers: usize,
    persistent: Option<Arc<ThreadPool>>,
}

impl WorkerPool {
    /// `num_workers == 0` builds batches on the consuming thread.
    pub fn new(num_workers: usize, persistent_workers: bool) -> Result<Self, MlError> {
        let persistent = if num_workers > 0 && persistent_workers {
            Some(Arc::new(build_pool(num_workers)?))
        } else {
            None
        };
        Ok(Self {
            num_workers,
            persistent,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.is_some()
    }

    /// Pool for one epoch: the persistent one, or a fresh one.
    fn epoch_pool(&self) -> Result<Option<Arc<ThreadPool>>, MlError> {
        match (&self.persistent, self.num_workers) {
            (Some(pool), _) => Ok(Some(Arc::clone(pool))),
            (None, 0) => Ok(None),
            (None, n) => Ok(Some(Arc::new(build_pool(n)?))),
        }
    }

    pub(crate) fn run<J: BatchJob>(&self, job: J) -> Result<Prefetch<J>, MlError> {
        let pool = self.epoch_pool()?;
        let (tx, rx) = mpsc::channel();
        Ok(Prefetch {
            job: Arc::new(job),
            window: self.num_workers * 2,
            pool,
            tx: Some(tx),
            rx,
            submitted: 0,
            yielded: 0,
            ready: BTreeMap::new(),
        })
    }
}

fn build_pool(num_workers: usize) -> Result<ThreadPool, MlError> {
    ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|i| format!("sagebench-loader-{i}"))
        .build()
        .map_err(|e| MlError::loader(format!("failed to start loader workers: {e}")))
}

type Slot = (usize, Result<Batch, MlError>);

/// Build one batch, turning a panic in the job into a loader error.
fn build_guarded<J: BatchJob>(job: &J, index: usize) -> Result<Batch, MlError> {
    panic::catch_unwind(AssertUnwindSafe(|| job.build(index))).unwrap_or_else(|payload| {
        Err(MlError::loader(format!(
            "building batch {index} panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Ordered iterator over one epoch of batches.
pub(crate) struct Prefetch<J: BatchJob> {
    job: Arc<J>,
    window: usize,
    pool: Option<Arc<ThreadPool>>,
    /// Dropped once every batch is submitted, so the channel closes when
    /// the last worker finishes.
    tx: Option<Sender<Slot>>,
    rx: Receiver<Slot>,
    submitted: usize,
    yielded: usize,
    ready: BTreeMap<usize, Result<Batch, MlError>>,
}

impl<J: BatchJob> Prefetch<J> {
    fn fill(&mut self, pool: &ThreadPool) {
        let Some(sender) = &self.tx else {
            return;
        };
        while self.submitted < self.job.len() && self.submitted < self.yielded + self.window {
            let index = self.submitted;
            let job = Arc::clone(&self.job);
            let tx = sender.clone();
            pool.spawn(move || {
                // The receiver is gone if the epoch was abandoned early.
                let _ = tx.send((index, build_guarded(job.as_ref(), index)));
            });
            self.submitted += 1;
        }
        if self.submitted == self.job.len() {
            self.tx = None;
        }
    }
}

impl<J: BatchJob> Iterator for Prefetch<J> {
    type Item = Result<Batch, MlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.job.len() {
            return None;
        }
        let Some(pool) = self.pool.clone() else {
            let batch = build_guarded(self.job.as_ref(), self.yielded);
            self.yielded += 1;
            return Some(batch);
        };

        self.fill(&pool);
        loop {
            if let Some(batch) = self.ready.remove(&self.yielded) {
                self.yielded += 1;
                self.fill(&pool);
                return Some(batch);
            }
            match self.rx.recv() {
                Ok((index, batch)) => {
                    self.ready.insert(index, batch);
                }
                Err(_) => {
                    self.yielded = self.job.len();
                    return Some(Err(MlError::loader("loader workers disconnected")));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.job.len() - self.yielded;
        (remaining, Some(remaining))
    }
}

impl<J: BatchJob> ExactSizeIterator for Prefetch<J> {}
