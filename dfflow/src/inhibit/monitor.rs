//! InhibitMonitor - turns pipeline backlog into Busy/Free messages.
//!
//! One background worker per monitor. Each iteration:
//! 1. bounded receive of a trigger decision (updates `admitted_seq`)
//! 2. re-evaluate the backlog against the live threshold
//! 3. if a transition is pending and the resend interval allows, bounded send
//!
//! Stopping is cooperative: an in-flight receive or send is always allowed to
//! finish or time out, but no new send starts once stop has been requested.
//! The input is locked per receive, so other consumers of the same source
//! can run alongside.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::controller::FlowController;
use super::progress::{ProgressCounters, ProgressHandle};
use crate::channel::{SharedReceiver, SharedSender};
use crate::config::MonitorConf;
use crate::error::{FlowError, Result};
use crate::message::{DecisionMessage, FlowState, InhibitMessage, RunNumber, TriggerNumber};

/// What the worker reports when it exits cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    pub received_count: u64,
    pub sent_count: u64,
    pub final_state: FlowState,
}

/// Counter snapshot for a metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorInfo {
    pub received_count: u64,
    pub sent_count: u64,
    pub admitted_seq: TriggerNumber,
    pub completed_seq: TriggerNumber,
    pub inhibit_threshold: u64,
}

/// Counters the worker publishes while it runs.
#[derive(Debug, Default)]
struct WorkerStats {
    received: AtomicU64,
    sent: AtomicU64,
    busy: AtomicBool,
}

impl WorkerStats {
    fn reset(&self) {
        self.received.store(0, Ordering::Release);
        self.sent.store(0, Ordering::Release);
        self.busy.store(false, Ordering::Release);
    }
}

struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<Result<MonitorSummary>>,
}

/// Everything the worker task owns for one run.
struct WorkerContext {
    name: String,
    input: SharedReceiver<DecisionMessage>,
    output: SharedSender<InhibitMessage>,
    progress: Arc<ProgressCounters>,
    stats: Arc<WorkerStats>,
    queue_timeout: Duration,
    min_resend_interval: Duration,
    run_number: RunNumber,
}

pub struct InhibitMonitor {
    name: String,
    input: SharedReceiver<DecisionMessage>,
    output: SharedSender<InhibitMessage>,
    conf: std::sync::Mutex<MonitorConf>,
    progress: Arc<ProgressCounters>,
    stats: Arc<WorkerStats>,
    worker: Mutex<Option<Worker>>,
}

impl InhibitMonitor {
    pub fn new(
        parent_name: &str,
        input: SharedReceiver<DecisionMessage>,
        output: SharedSender<InhibitMessage>,
    ) -> Self {
        let conf = MonitorConf::default();
        Self {
            name: format!("{parent_name}::InhibitMonitor"),
            input,
            output,
            progress: Arc::new(ProgressCounters::new(conf.inhibit_threshold)),
            conf: std::sync::Mutex::new(conf),
            stats: Arc::new(WorkerStats::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a configuration. Timeouts take effect at the next start; the
    /// threshold takes effect immediately.
    pub fn configure(&self, conf: &MonitorConf) -> Result<()> {
        conf.validate()?;
        self.progress.set_threshold(conf.inhibit_threshold);
        tracing::debug!(
            name = %self.name,
            queue_timeout_ms = conf.queue_timeout,
            inhibit_threshold = conf.inhibit_threshold,
            min_resend_interval_ms = conf.min_resend_interval,
            "Configured"
        );
        match self.conf.lock() {
            Ok(mut guard) => *guard = conf.clone(),
            Err(poisoned) => *poisoned.into_inner() = conf.clone(),
        }
        Ok(())
    }

    fn current_conf(&self) -> MonitorConf {
        match self.conf.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Change the threshold while running. 0 disables monitoring.
    pub fn set_threshold(&self, threshold: u64) {
        self.progress.set_threshold(threshold);
    }

    /// Record pipeline-exit progress. Safe from any thread; never blocks.
    pub fn set_completed_seq(&self, seq: TriggerNumber) {
        self.progress.set_completed_seq(seq);
    }

    /// A cloneable handle for the completion path.
    pub fn progress_handle(&self) -> ProgressHandle {
        ProgressHandle::new(Arc::clone(&self.progress))
    }

    /// The last state successfully announced downstream.
    pub fn current_state(&self) -> FlowState {
        if self.stats.busy.load(Ordering::Acquire) {
            FlowState::Busy
        } else {
            FlowState::Free
        }
    }

    pub fn info(&self) -> MonitorInfo {
        let progress = self.progress.snapshot();
        MonitorInfo {
            received_count: self.stats.received.load(Ordering::Acquire),
            sent_count: self.stats.sent.load(Ordering::Acquire),
            admitted_seq: progress.admitted_seq,
            completed_seq: progress.completed_seq,
            inhibit_threshold: progress.inhibit_threshold,
        }
    }

    /// Start the worker. Fails if a worker is already running (or has
    /// stopped on its own and not yet been collected with [`stop`](Self::stop)).
    pub async fn start(&self, run_number: RunNumber) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(FlowError::AlreadyRunning(self.name.clone()));
        }

        let conf = self.current_conf();
        self.stats.reset();

        let ctx = WorkerContext {
            name: self.name.clone(),
            input: Arc::clone(&self.input),
            output: Arc::clone(&self.output),
            progress: Arc::clone(&self.progress),
            stats: Arc::clone(&self.stats),
            queue_timeout: conf.queue_timeout(),
            min_resend_interval: conf.min_resend_interval(),
            run_number,
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_worker(ctx, cancel.clone()));
        *worker = Some(Worker { cancel, task });

        tracing::info!(name = %self.name, run_number, "Successfully started");
        Ok(())
    }

    /// Signal the worker to stop and wait for it.
    ///
    /// Returns `Ok(None)` if nothing was running, the worker's summary on a
    /// clean exit, or the fatal error that terminated it.
    pub async fn stop(&self) -> Result<Option<MonitorSummary>> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(None);
        };

        worker.cancel.cancel();
        let summary = match worker.task.await {
            Ok(result) => result?,
            Err(e) => return Err(FlowError::WorkerPanicked(e.to_string())),
        };
        tracing::info!(name = %self.name, "Successfully stopped");
        Ok(Some(summary))
    }

    /// Whether a worker is running and has not exited on its own.
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.task.is_finished())
    }
}

async fn run_worker(ctx: WorkerContext, cancel: CancellationToken) -> Result<MonitorSummary> {
    tracing::debug!(name = %ctx.name, "Entering worker loop");

    let mut controller = FlowController::new(ctx.min_resend_interval, Instant::now());
    let mut received_count = 0u64;
    let mut sent_count = 0u64;

    while !cancel.is_cancelled() {
        // The input may be shared with other consumers: hold it for one receive only.
        let received = {
            let mut input = tokio::select! {
                _ = cancel.cancelled() => break,
                input = ctx.input.lock() => input,
            };
            input.receive(ctx.queue_timeout).await
        };
        match received {
            Ok(decision) => {
                received_count += 1;
                ctx.stats.received.store(received_count, Ordering::Release);
                tracing::trace!(
                    name = %ctx.name,
                    trigger_number = decision.trigger_number,
                    "Popped trigger decision off the input queue"
                );
                ctx.progress.set_admitted_seq(decision.trigger_number);
            }
            // No new admissions this time round.
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                tracing::error!(
                    name = %ctx.name,
                    error = %e,
                    received_count,
                    sent_count,
                    "Decision input failed, worker exiting"
                );
                return Err(e.into());
            }
        }

        controller.evaluate(ctx.progress.snapshot());

        if cancel.is_cancelled() {
            break;
        }
        let Some(target) = controller.due(Instant::now()) else {
            continue;
        };

        let message = target.to_message(ctx.run_number);
        tracing::debug!(name = %ctx.name, busy = message.busy, "Pushing inhibit message onto the output queue");
        match ctx.output.send(message, ctx.queue_timeout).await {
            Ok(()) => {
                sent_count += 1;
                ctx.stats.sent.store(sent_count, Ordering::Release);
                ctx.stats
                    .busy
                    .store(target == FlowState::Busy, Ordering::Release);
                controller.mark_sent(target, Instant::now());
            }
            // Dropped. Still pending, so a later iteration tries again if it is still warranted.
            Err(e) if e.is_timeout() => {
                tracing::debug!(name = %ctx.name, busy = message.busy, "Timeout pushing inhibit message onto the output queue");
            }
            Err(e) => {
                tracing::error!(
                    name = %ctx.name,
                    error = %e,
                    received_count,
                    sent_count,
                    "Inhibit output failed, worker exiting"
                );
                return Err(e.into());
            }
        }
    }

    tracing::info!(
        name = %ctx.name,
        received_count,
        sent_count,
        final_state = %controller.current(),
        "Exiting worker loop"
    );
    Ok(MonitorSummary {
        received_count,
        sent_count,
        final_state: controller.current(),
    })
}
