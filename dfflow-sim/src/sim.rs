//! A toy trigger pipeline: producer → relay → slow consumer, with the
//! inhibit monitor watching a copy of the decision stream and the producer
//! holding off while the last inhibit it saw was Busy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use dfflow::channel::queue::{QueueReceiver, QueueSender, bounded};
use dfflow::{
    DecisionMessage, DecisionRelay, FlowState, InhibitMessage, InhibitMonitor, MonitorConf, MonitorSummary,
    ProgressHandle, Receiver, RelayConf, RelayInfo, RunNumber, Sender, shared_receiver,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimParams {
    pub run: RunNumber,
    pub triggers: u64,
    /// Gap between admissions, in milliseconds.
    pub admit_interval: u64,
    /// Time the consumer spends on each decision, in milliseconds.
    pub process_time: u64,
    pub queue_capacity: usize,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            run: 1,
            triggers: 200,
            admit_interval: 1,
            process_time: 5,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub relay: RelayConf,
    pub monitor: MonitorConf,
    pub sim: SimParams,
}

impl SimConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid simulator config")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.relay.validate()?;
        self.monitor.validate()?;
        if self.sim.queue_capacity == 0 {
            bail!("sim.queue_capacity must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct InhibitTally {
    pub busy: u64,
    pub free: u64,
}

impl InhibitTally {
    fn record(&mut self, msg: InhibitMessage) {
        if msg.busy {
            self.busy += 1;
        } else {
            self.free += 1;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimReport {
    pub run: RunNumber,
    pub triggers: u64,
    pub completed_seq: u64,
    pub relay: RelayInfo,
    pub monitor: MonitorSummary,
    pub inhibits_seen: InhibitTally,
    pub elapsed_ms: u128,
}

struct Producer {
    admission: QueueSender<DecisionMessage>,
    monitor_feed: QueueSender<DecisionMessage>,
    inhibits: QueueReceiver<InhibitMessage>,
    tally: InhibitTally,
    busy: bool,
    timeout: Duration,
}

impl Producer {
    fn drain_inhibits(&mut self) {
        while let Some(msg) = self.inhibits.try_receive() {
            self.tally.record(msg);
            self.busy = msg.busy;
        }
    }

    async fn wait_until_free(&mut self) -> anyhow::Result<()> {
        while self.busy {
            match self.inhibits.receive(self.timeout).await {
                Ok(msg) => {
                    self.tally.record(msg);
                    self.busy = msg.busy;
                }
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e).context("inhibit channel failed"),
            }
        }
        Ok(())
    }

    async fn admit(&mut self, decision: DecisionMessage) -> anyhow::Result<()> {
        self.drain_inhibits();
        if self.busy {
            tracing::debug!(trigger_number = decision.trigger_number, "Holding admission while busy");
            self.wait_until_free().await?;
        }
        self.admission
            .send(decision, self.timeout)
            .await
            .context("admission queue")?;
        // The monitor only needs the latest number; a dropped copy is harmless.
        if let Err(e) = self.monitor_feed.send(decision, self.timeout).await {
            tracing::warn!(error = %e, "Monitor feed dropped a decision");
        }
        Ok(())
    }
}

async fn consume(
    mut downstream: QueueReceiver<DecisionMessage>,
    completion: ProgressHandle,
    process_time: Duration,
    poll: Duration,
) -> anyhow::Result<u64> {
    let mut processed = 0u64;
    loop {
        match downstream.receive(poll).await {
            Ok(decision) => {
                tokio::time::sleep(process_time).await;
                completion.set_completed_seq(decision.trigger_number);
                processed += 1;
            }
            Err(e) if e.is_timeout() => {}
            Err(_) => return Ok(processed),
        }
    }
}

/// How long to wait for the consumer to finish what was admitted.
fn settle_grace(params: &SimParams, poll: Duration) -> Duration {
    let per_trigger_ms = params.process_time.saturating_mul(params.triggers.saturating_add(10));
    Duration::from_millis(per_trigger_ms).saturating_add(poll.saturating_mul(10))
}

pub async fn run(config: SimConfig) -> anyhow::Result<SimReport> {
    config.validate()?;
    let params = &config.sim;
    let started = Instant::now();
    let timeout = config.monitor.queue_timeout();

    let (admission_tx, admission_rx) = bounded(params.queue_capacity);
    let (downstream_tx, downstream_rx) = bounded(params.queue_capacity);
    let (monitor_tx, monitor_rx) = bounded(params.queue_capacity);
    let (inhibit_tx, inhibit_rx) = bounded(params.queue_capacity);

    let relay = DecisionRelay::new(
        "sim::DecisionRelay",
        shared_receiver(admission_rx),
        Arc::new(downstream_tx),
    );
    relay.configure(&config.relay)?;

    let monitor = InhibitMonitor::new("sim", shared_receiver(monitor_rx), Arc::new(inhibit_tx));
    monitor.configure(&config.monitor)?;

    let consumer = tokio::spawn(consume(
        downstream_rx,
        monitor.progress_handle(),
        Duration::from_millis(params.process_time),
        timeout,
    ));

    monitor.start(params.run).await?;
    relay.start(params.run).await?;
    tracing::info!(run = params.run, triggers = params.triggers, "Simulation started");

    let mut producer = Producer {
        admission: admission_tx,
        monitor_feed: monitor_tx,
        inhibits: inhibit_rx,
        tally: InhibitTally::default(),
        busy: false,
        timeout,
    };
    let admit_interval = Duration::from_millis(params.admit_interval);
    for trigger_number in 1..=params.triggers {
        producer
            .admit(DecisionMessage::new(trigger_number).with_run(params.run))
            .await?;
        tokio::time::sleep(admit_interval).await;
    }

    // Let the consumer catch up with whatever the relay delivered, and the
    // monitor announce the drained backlog.
    let completion = monitor.progress_handle();
    let expected = params.triggers;
    let deadline = Instant::now().checked_add(settle_grace(params, timeout));
    let settled = |completed: u64| completed >= expected && monitor.current_state() == FlowState::Free;
    while !settled(completion.completed_seq()) && relay.info().dropped_count == 0 {
        if deadline.is_some_and(|d| Instant::now() > d) {
            tracing::warn!(completed = completion.completed_seq(), expected, "Consumer did not catch up");
            break;
        }
        producer.drain_inhibits();
        tokio::time::sleep(timeout).await;
    }

    let relay_info = relay.stop().await?;
    let summary = monitor.stop().await?.context("monitor was not running")?;
    producer.drain_inhibits();

    // Closing the relay's output ends the consumer.
    drop(relay);
    let processed = consumer.await.context("consumer task")??;
    tracing::info!(processed, "Simulation finished");

    Ok(SimReport {
        run: params.run,
        triggers: params.triggers,
        completed_seq: completion.completed_seq(),
        relay: relay_info,
        monitor: summary,
        inhibits_seen: producer.tally,
        elapsed_ms: started.elapsed().as_millis(),
    })
}
