use std::time::Duration;
use zab_core::{Result, ZabError};

#[derive(Debug, Clone)]
pub struct ZabConfig {
    /// Period at which the failure detector sends heartbeats and checks
    /// liveness.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is considered gone.
    pub heartbeat_timeout: Duration,
    /// Longest a node may stay in ELECTION, DISCOVERY or SYNCHRONIZATION
    /// before moving on to the next candidate.
    pub phase_timeout: Duration,
    /// Resend period for FOLLOWERINFO while waiting for NEWEPOCH.
    pub follower_info_retry: Duration,
    /// Cadence of [`crate::ZabNode::run`].
    pub tick_interval: Duration,
}

impl Default for ZabConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_secs(2),
            phase_timeout: Duration::from_secs(5),
            follower_info_retry: Duration::from_millis(250),
            tick_interval: Duration::from_millis(10),
        }
    }
}

impl ZabConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_follower_info_retry(mut self, interval: Duration) -> Self {
        self.follower_info_retry = interval;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("phase_timeout", self.phase_timeout),
            ("follower_info_retry", self.follower_info_retry),
            ("tick_interval", self.tick_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(ZabError::InvalidConfig {
                message: format!("{} must be non-zero", name),
            });
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ZabError::InvalidConfig {
                message: format!(
                    "heartbeat_timeout {:?} must exceed heartbeat_interval {:?}",
                    self.heartbeat_timeout, self.heartbeat_interval
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ZabConfig::default().validate().is_ok());
    }

    #[test]
    fn test_timeout_must_exceed_interval() {
        let config = ZabConfig::new()
            .with_heartbeat_interval(Duration::from_millis(500))
            .with_heartbeat_timeout(Duration::from_millis(500));
        assert!(config.validate().is_err());

        let config = ZabConfig::new().with_tick_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
