//! Serial work queue.
//!
//! Jobs run one at a time, in the order they were scheduled, on a worker task
//! that is spawned on first use. A job that panics is reported to its caller
//! and the worker moves on to the next job.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::KernelError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Clone)]
pub struct SerialScheduler {
    name: Arc<str>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Job>>>>,
}

impl SerialScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            tx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `work` and waits for it to finish.
    pub async fn run<F, T>(&self, work: F) -> Result<T, KernelError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule(work)?.wait().await
    }

    /// Enqueues `work` immediately. Jobs run in the order `schedule` was
    /// called, whether or not their handles are awaited.
    pub fn schedule<F, T>(&self, work: F) -> Result<Scheduled<T>, KernelError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let out = AssertUnwindSafe(work).catch_unwind().await;
            let _ = done_tx.send(out);
        });
        self.sender()?
            .send(job)
            .map_err(|_| KernelError::SchedulerClosed(self.name.to_string()))?;
        Ok(Scheduled {
            name: self.name.clone(),
            done: done_rx,
        })
    }

    fn sender(&self) -> Result<mpsc::UnboundedSender<Job>, KernelError> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| KernelError::SchedulerClosed(self.name.to_string()))?;
        if let Some(tx) = guard.as_ref().filter(|tx| !tx.is_closed()) {
            return Ok(tx.clone());
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let name = self.name.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            log::debug!("scheduler '{name}' stopped");
        });
        *guard = Some(tx.clone());
        Ok(tx)
    }
}

/// Handle to a scheduled job.
pub struct Scheduled<T> {
    name: Arc<str>,
    done: oneshot::Receiver<std::thread::Result<T>>,
}

impl<T> Scheduled<T> {
    pub async fn wait(self) -> Result<T, KernelError> {
        match self.done.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(KernelError::Panic(panic_message(panic.as_ref()))),
            Err(_) => Err(KernelError::SchedulerClosed(self.name.to_string())),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
