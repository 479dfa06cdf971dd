//! Configuration payloads accepted by the `conf` and `start` commands.
//!
//! All durations are given in milliseconds. Missing fields take their
//! defaults, so an empty object (or `null`) is a valid payload.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::message::RunNumber;

pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_INHIBIT_THRESHOLD: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConf {
    /// Bound on each forward, in milliseconds.
    pub general_queue_timeout: u64,
}

impl Default for RelayConf {
    fn default() -> Self {
        Self {
            general_queue_timeout: DEFAULT_QUEUE_TIMEOUT_MS,
        }
    }
}

impl RelayConf {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.general_queue_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.general_queue_timeout == 0 {
            return Err(FlowError::InvalidConfig(
                "general_queue_timeout must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConf {
    /// Bound on each receive and send, in milliseconds.
    pub queue_timeout: u64,
    /// Backlog at which Busy is asserted. 0 disables monitoring.
    pub inhibit_threshold: u64,
    /// Minimum gap between two inhibit messages, in milliseconds.
    pub min_resend_interval: u64,
}

impl Default for MonitorConf {
    fn default() -> Self {
        Self {
            queue_timeout: DEFAULT_QUEUE_TIMEOUT_MS,
            inhibit_threshold: DEFAULT_INHIBIT_THRESHOLD,
            min_resend_interval: 0,
        }
    }
}

impl MonitorConf {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout)
    }

    pub fn min_resend_interval(&self) -> Duration {
        Duration::from_millis(self.min_resend_interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_timeout == 0 {
            return Err(FlowError::InvalidConfig(
                "queue_timeout must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the `start` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartParams {
    pub run: RunNumber,
}

/// Decode a command payload, treating `null` as "all defaults".
pub fn from_payload<T>(payload: &serde_json::Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload.clone()).map_err(|e| FlowError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn monitor_defaults() {
        let conf: MonitorConf = from_payload(&json!({})).unwrap();
        assert_eq!(conf, MonitorConf::default());
        assert_eq!(conf.queue_timeout(), Duration::from_millis(100));
        assert_eq!(conf.inhibit_threshold, 1);
        assert_eq!(conf.min_resend_interval(), Duration::ZERO);
    }

    #[test]
    fn null_payload_is_default() {
        let conf: RelayConf = from_payload(&serde_json::Value::Null).unwrap();
        assert_eq!(conf.queue_timeout(), Duration::from_millis(100));
        let start: StartParams = from_payload(&serde_json::Value::Null).unwrap();
        assert_eq!(start.run, 0);
    }

    #[test]
    fn partial_monitor_payload() {
        let conf: MonitorConf =
            from_payload(&json!({"inhibit_threshold": 5, "min_resend_interval": 250})).unwrap();
        assert_eq!(conf.inhibit_threshold, 5);
        assert_eq!(conf.min_resend_interval(), Duration::from_millis(250));
        assert_eq!(conf.queue_timeout, DEFAULT_QUEUE_TIMEOUT_MS);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = from_payload::<RelayConf>(&json!({"queue_timout": 5})).unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let conf = MonitorConf {
            queue_timeout: 0,
            ..MonitorConf::default()
        };
        assert!(conf.validate().is_err());
        assert!(RelayConf { general_queue_timeout: 0 }.validate().is_err());
        assert!(RelayConf::default().validate().is_ok());
    }

    #[test]
    fn start_params_read_run_number() {
        let start: StartParams = from_payload(&json!({"run": 1234})).unwrap();
        assert_eq!(start.run, 1234);
    }

    #[test]
    fn monitor_conf_serializes() {
        insta::assert_json_snapshot!(MonitorConf::default(), @r#"
        {
          "queue_timeout": 100,
          "inhibit_threshold": 1,
          "min_resend_interval": 0
        }
        "#);
    }
}
