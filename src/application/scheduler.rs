//! Scheduler domain: one dedicated thread running a current-thread tokio
//! runtime. All orchestration work for an agent instance runs there,
//! concurrently but never in parallel.
//!
//! The dispatch domain (transport callbacks, plain threads) hands work over
//! with [`Dispatcher::dispatch`]. A handoff that cannot be delivered runs the
//! caller's reject hook so the inbound message is nacked, never dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc as std_mpsc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};

/// A unit of orchestration work.
pub type Job = Pin<Box<dyn Future<Output = OrchestrationResult<()>> + Send + 'static>>;

type RejectHook = Box<dyn FnOnce() + Send + 'static>;

enum SchedulerCommand {
    Run {
        name: String,
        job: Job,
        on_reject: RejectHook,
        done: oneshot::Sender<OrchestrationResult<()>>,
    },
    Shutdown,
}

/// Owner of the scheduler thread. Dropping it shuts the thread down.
pub struct Scheduler {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the scheduler thread and wait until its runtime is up.
    ///
    /// # Errors
    /// Returns `SchedulerUnavailable` if the thread or runtime cannot start.
    pub fn start(name: &str) -> OrchestrationResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<bool>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "Scheduler runtime failed to start");
                        let _ = ready_tx.send(false);
                        return;
                    }
                };
                let _ = ready_tx.send(true);
                runtime.block_on(Self::process_commands(rx));
            })
            .map_err(|e| {
                error!(error = %e, "Failed to spawn scheduler thread");
                OrchestrationError::SchedulerUnavailable
            })?;

        if !ready_rx.recv().unwrap_or(false) {
            return Err(OrchestrationError::SchedulerUnavailable);
        }
        info!(scheduler = name, "Scheduler started");

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Handle for handing work to this scheduler.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting work and join the thread. Queued jobs and jobs still
    /// in flight are rejected.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Scheduler thread panicked");
            }
        }
    }

    async fn process_commands(mut rx: mpsc::UnboundedReceiver<SchedulerCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                SchedulerCommand::Run {
                    name,
                    job,
                    on_reject,
                    done,
                } => {
                    tokio::spawn(run_job(name, job, on_reject, done));
                }
                SchedulerCommand::Shutdown => {
                    debug!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        rx.close();
        while let Ok(command) = rx.try_recv() {
            if let SchedulerCommand::Run {
                name,
                on_reject,
                done,
                ..
            } = command
            {
                warn!(job = %name, "Rejecting job queued after shutdown");
                on_reject();
                let _ = done.send(Err(OrchestrationError::SchedulerUnavailable));
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Completion wrapper: logs failures and reports the result to the ticket.
///
/// A job still running when the scheduler runtime is torn down is dropped
/// mid-flight; its reject hook runs then and the ticket resolves to
/// `SchedulerUnavailable`.
async fn run_job(
    name: String,
    job: Job,
    on_reject: RejectHook,
    done: oneshot::Sender<OrchestrationResult<()>>,
) {
    let mut guard = RejectOnDrop {
        name,
        hook: Some(on_reject),
    };
    let result = job.await;
    guard.hook = None;
    match &result {
        Ok(()) => debug!(job = %guard.name, "Scheduled job finished"),
        Err(e) => error!(job = %guard.name, error = %e, "Scheduled job failed"),
    }
    let _ = done.send(result);
}

struct RejectOnDrop {
    name: String,
    hook: Option<RejectHook>,
}

impl Drop for RejectOnDrop {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            warn!(job = %self.name, "Scheduler stopped before job finished; rejecting");
            hook();
        }
    }
}

/// Cloneable handle used by the dispatch domain.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl Dispatcher {
    /// Hand `job` to the scheduler. Callable from any thread, no runtime needed.
    ///
    /// `on_reject` runs exactly when the job will never run.
    ///
    /// # Errors
    /// Returns `SchedulerUnavailable` if the scheduler is gone; `on_reject`
    /// has already run in that case.
    pub fn dispatch<F, R>(&self, name: &str, job: F, on_reject: R) -> OrchestrationResult<DispatchTicket>
    where
        F: Future<Output = OrchestrationResult<()>> + Send + 'static,
        R: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let command = SchedulerCommand::Run {
            name: name.to_string(),
            job: Box::pin(job),
            on_reject: Box::new(on_reject),
            done: done_tx,
        };
        match self.tx.send(command) {
            Ok(()) => Ok(DispatchTicket { rx: done_rx }),
            Err(mpsc::error::SendError(command)) => {
                error!(job = name, "Scheduler unavailable; rejecting work");
                if let SchedulerCommand::Run { on_reject, .. } = command {
                    on_reject();
                }
                Err(OrchestrationError::SchedulerUnavailable)
            }
        }
    }
}

/// Future resolving to the dispatched job's result.
pub struct DispatchTicket {
    rx: oneshot::Receiver<OrchestrationResult<()>>,
}

impl Future for DispatchTicket {
    type Output = OrchestrationResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(OrchestrationError::SchedulerUnavailable)))
    }
}
