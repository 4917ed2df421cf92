use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type Task = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Cooperative timer that runs a task every `period` until stopped. Runs
/// are serialised by the worker loop, so a slow run delays the next one
/// instead of overlapping it.
pub struct PeriodicService {
    name: &'static str,
    period: Duration,
    task: Task,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
    disposed: bool,
}

impl PeriodicService {
    pub fn new<F, Fut>(name: &'static str, period: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: Task = Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(task())
        });
        PeriodicService {
            name,
            period,
            task,
            worker: None,
            disposed: false,
        }
    }

    pub fn started(&self) -> bool {
        self.worker.is_some()
    }

    /// A zero period stops the service.
    pub async fn set_period(&mut self, period: Duration) -> Result<()> {
        self.period = period;
        if period.is_zero() {
            self.stop().await?;
        }
        Ok(())
    }

    /// Launch the worker; an already-started service is stopped first.
    pub async fn start(&mut self) -> Result<()> {
        if self.disposed {
            return Err(Error::ServiceDisposed(self.name));
        }
        if self.worker.is_some() {
            self.stop().await?;
        }
        if self.period.is_zero() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let task = self.task.clone();
        let period = self.period;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = worker_token.cancelled() => break,
                    () = sleep(period) => {}
                }

                task().await;
            }
        });

        self.worker = Some((token, handle));
        Ok(())
    }

    /// Request cancellation and wait for the in-flight run to complete.
    pub async fn stop(&mut self) -> Result<()> {
        if self.disposed {
            return Err(Error::ServiceDisposed(self.name));
        }
        if let Some((token, handle)) = self.worker.take() {
            token.cancel();
            let _ = handle.await;
        }
        Ok(())
    }

    /// Stop and make every further `start`/`stop` an error.
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.stop().await?;
        self.disposed = true;
        Ok(())
    }
}
