//! Run-control commands for the relay and the monitor.
//!
//! A run-control layer addresses components by command name with a JSON
//! payload: `conf` (configuration), `start` (`{"run": N}`), `stop`, `scrap`.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{MonitorConf, RelayConf, StartParams, from_payload};
use crate::error::{FlowError, Result};
use crate::inhibit::InhibitMonitor;
use crate::relay::DecisionRelay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Conf,
    Start,
    Stop,
    Scrap,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conf => "conf",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Scrap => "scrap",
        }
    }
}

impl FromStr for Command {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "conf" => Ok(Self::Conf),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "scrap" => Ok(Self::Scrap),
            other => Err(FlowError::UnknownCommand(other.to_string())),
        }
    }
}

/// A component driven by run-control commands.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, command: Command, payload: &Value) -> Result<()>;

    /// Current counters, for the metrics collector.
    fn info(&self) -> Value;
}

/// Parse `command` and run it on `module`.
pub async fn dispatch(module: &dyn Module, command: &str, payload: &Value) -> Result<()> {
    let command = command.parse::<Command>()?;
    tracing::debug!(module = module.name(), command = command.as_str(), "Executing command");
    module.execute(command, payload).await
}

#[async_trait]
impl Module for DecisionRelay {
    fn name(&self) -> &str {
        DecisionRelay::name(self)
    }

    async fn execute(&self, command: Command, payload: &Value) -> Result<()> {
        match command {
            Command::Conf => self.configure(&from_payload::<RelayConf>(payload)?),
            Command::Start => {
                let params = from_payload::<StartParams>(payload)?;
                self.start(params.run).await
            }
            Command::Stop => self.stop().await.map(|_| ()),
            Command::Scrap => {
                tracing::info!(name = %DecisionRelay::name(self), "Successfully scrapped");
                Ok(())
            }
        }
    }

    fn info(&self) -> Value {
        serde_json::to_value(DecisionRelay::info(self)).unwrap_or_default()
    }
}

#[async_trait]
impl Module for InhibitMonitor {
    fn name(&self) -> &str {
        InhibitMonitor::name(self)
    }

    async fn execute(&self, command: Command, payload: &Value) -> Result<()> {
        match command {
            Command::Conf => self.configure(&from_payload::<MonitorConf>(payload)?),
            Command::Start => {
                let params = from_payload::<StartParams>(payload)?;
                self.start(params.run).await
            }
            Command::Stop => self.stop().await.map(|_| ()),
            Command::Scrap => {
                tracing::info!(name = %InhibitMonitor::name(self), "Successfully scrapped");
                Ok(())
            }
        }
    }

    fn info(&self) -> Value {
        serde_json::to_value(InhibitMonitor::info(self)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::queue::bounded;
    use crate::channel::{Receiver, Sender, shared_receiver};
    use crate::message::DecisionMessage;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn parses_known_commands() {
        for name in ["conf", "start", "stop", "scrap"] {
            assert_eq!(name.parse::<Command>().unwrap().as_str(), name);
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = "pause".parse::<Command>().unwrap_err();
        assert_eq!(err.to_string(), "unknown command 'pause'");
    }

    #[tokio::test(start_paused = true)]
    async fn relay_runs_through_a_command_sequence() {
        let (in_tx, in_rx) = bounded(4);
        let (out_tx, mut out_rx) = bounded(4);
        let relay = DecisionRelay::new("trb", shared_receiver(in_rx), Arc::new(out_tx));
        let module: &dyn Module = &relay;

        dispatch(module, "conf", &json!({"general_queue_timeout": 20})).await.unwrap();
        dispatch(module, "start", &json!({"run": 77})).await.unwrap();

        in_tx
            .send(DecisionMessage::new(1).with_run(77), Duration::from_millis(20))
            .await
            .unwrap();
        let forwarded = out_rx.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(forwarded.run_number, 77);

        dispatch(module, "stop", &Value::Null).await.unwrap();
        dispatch(module, "scrap", &Value::Null).await.unwrap();

        assert_eq!(
            module.info(),
            json!({"run_number": 77, "forwarded_count": 1, "dropped_count": 0})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_rejects_bad_configuration() {
        let (_in_tx, in_rx) = bounded::<DecisionMessage>(1);
        let (out_tx, _out_rx) = bounded(1);
        let monitor = InhibitMonitor::new("dfo", shared_receiver(in_rx), Arc::new(out_tx));

        let err = dispatch(&monitor, "conf", &json!({"queue_timeout": 0}))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));

        dispatch(&monitor, "conf", &json!({"inhibit_threshold": 9}))
            .await
            .unwrap();
        assert_eq!(monitor.info().inhibit_threshold, 9);

        dispatch(&monitor, "start", &Value::Null).await.unwrap();
        dispatch(&monitor, "stop", &Value::Null).await.unwrap();
    }
}
