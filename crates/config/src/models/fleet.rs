use std::time::Duration;

use orchestrator_domain::NodeConfig;
use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 本地模式下 STARTING 与 FINISHING 的超时
pub const LOCAL_MODE_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunnerType {
    #[default]
    Remote,
    Local,
}

impl std::str::FromStr for RunnerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" => Ok(RunnerType::Remote),
            "local" => Ok(RunnerType::Local),
            _ => Err(format!("Invalid runner type: {s}. Valid types: remote, local")),
        }
    }
}

/// 各节点状态的停留超时（毫秒）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FleetTimeouts {
    pub pending_ms: u64,
    pub starting_ms: u64,
    pub finishing_ms: u64,
    pub idle_ms: u64,
    /// TERMINATED 节点保留时间
    pub terminated_ms: u64,
    /// ERROR 节点保留时间
    pub error_ms: u64,
}

impl Default for FleetTimeouts {
    fn default() -> Self {
        Self {
            pending_ms: 5 * 60 * 1000,
            starting_ms: 5 * 60 * 1000,
            finishing_ms: 24 * 60 * 60 * 1000,
            idle_ms: 30 * 60 * 1000,
            terminated_ms: 24 * 60 * 60 * 1000,
            error_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// 单次 tick 持锁的最长时间
    pub tick_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub stop_poll_interval_ms: u64,
    /// 拿不到锁或 tick 失败后的等待时间
    pub retry_delay_ms: u64,
    /// 两次成功 tick 之间的间隔
    pub tick_interval_ms: u64,
    /// 每页路由 ID 数量
    pub search_page_size: i64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_timeout_ms: 60_000,
            stop_timeout_ms: 60_000,
            stop_poll_interval_ms: 1000,
            retry_delay_ms: 5000,
            tick_interval_ms: 1000,
            search_page_size: 100,
        }
    }
}

impl SupervisorConfig {
    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// notifyWhenIdle 请求的重试设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            request_timeout_ms: 5000,
        }
    }
}

/// 本地进程节点提供者
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub program: String,
    pub args: Vec<String>,
    pub base_port: u16,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            program: "orchestrator-runner".to_string(),
            args: Vec::new(),
            base_port: 3006,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    pub enabled: bool,
    pub runner_type: RunnerType,
    pub timeouts: FleetTimeouts,
    pub supervisor: SupervisorConfig,
    pub notify: NotifyConfig,
    pub default_node: NodeConfig,
    pub local_provider: LocalProviderConfig,
}

impl FleetConfig {
    pub fn is_local(&self) -> bool {
        self.runner_type == RunnerType::Local
    }

    /// 本地模式缩短 STARTING 与 FINISHING 超时
    pub fn effective_timeouts(&self) -> FleetTimeouts {
        let mut timeouts = self.timeouts;
        if self.is_local() {
            timeouts.starting_ms = LOCAL_MODE_TIMEOUT_MS;
            timeouts.finishing_ms = LOCAL_MODE_TIMEOUT_MS;
        }
        timeouts
    }
}

impl ConfigValidator for FleetConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let t = &self.timeouts;
        ValidationUtils::validate_duration_ms(t.pending_ms, "fleet.timeouts.pending_ms")?;
        ValidationUtils::validate_duration_ms(t.starting_ms, "fleet.timeouts.starting_ms")?;
        ValidationUtils::validate_duration_ms(t.finishing_ms, "fleet.timeouts.finishing_ms")?;
        ValidationUtils::validate_duration_ms(t.idle_ms, "fleet.timeouts.idle_ms")?;
        ValidationUtils::validate_duration_ms(t.terminated_ms, "fleet.timeouts.terminated_ms")?;
        ValidationUtils::validate_duration_ms(t.error_ms, "fleet.timeouts.error_ms")?;

        let s = &self.supervisor;
        ValidationUtils::validate_duration_ms(s.tick_timeout_ms, "fleet.supervisor.tick_timeout_ms")?;
        ValidationUtils::validate_duration_ms(s.stop_timeout_ms, "fleet.supervisor.stop_timeout_ms")?;
        ValidationUtils::validate_duration_ms(
            s.stop_poll_interval_ms,
            "fleet.supervisor.stop_poll_interval_ms",
        )?;
        ValidationUtils::validate_duration_ms(s.retry_delay_ms, "fleet.supervisor.retry_delay_ms")?;
        if s.search_page_size <= 0 {
            return Err(crate::ConfigError::Validation(
                "fleet.supervisor.search_page_size must be greater than 0".to_string(),
            ));
        }
        ValidationUtils::validate_count(
            s.search_page_size as u64,
            "fleet.supervisor.search_page_size",
        )?;

        if self.notify.max_attempts == 0 {
            return Err(crate::ConfigError::Validation(
                "fleet.notify.max_attempts must be greater than 0".to_string(),
            ));
        }
        ValidationUtils::validate_duration_ms(
            self.notify.request_timeout_ms,
            "fleet.notify.request_timeout_ms",
        )?;

        let node = &self.default_node;
        ValidationUtils::validate_not_empty(&node.image, "fleet.default_node.image")?;
        if node.cpu_milli <= 0 || node.memory_mb <= 0 || node.storage_mb <= 0 {
            return Err(crate::ConfigError::Validation(
                "fleet.default_node resources must be greater than 0".to_string(),
            ));
        }

        if self.is_local() {
            ValidationUtils::validate_not_empty(
                &self.local_provider.program,
                "fleet.local_provider.program",
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_config_defaults_are_valid() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.notify.max_attempts, 5);
        assert_eq!(config.notify.initial_backoff_ms, 100);
        assert_eq!(config.supervisor.search_page_size, 100);
        assert_eq!(config.supervisor.stop_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_effective_timeouts_local_mode() {
        let mut config = FleetConfig::default();
        assert_eq!(config.effective_timeouts(), config.timeouts);

        config.runner_type = RunnerType::Local;
        let timeouts = config.effective_timeouts();
        assert_eq!(timeouts.starting_ms, LOCAL_MODE_TIMEOUT_MS);
        assert_eq!(timeouts.finishing_ms, LOCAL_MODE_TIMEOUT_MS);
        assert_eq!(timeouts.pending_ms, config.timeouts.pending_ms);
        assert_eq!(timeouts.idle_ms, config.timeouts.idle_ms);
    }

    #[test]
    fn test_fleet_config_rejects_invalid_values() {
        let mut config = FleetConfig::default();
        config.timeouts.idle_ms = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.supervisor.search_page_size = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.default_node.storage_mb = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.notify.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runner_type_parsing() {
        assert_eq!("LOCAL".parse::<RunnerType>().unwrap(), RunnerType::Local);
        assert_eq!("remote".parse::<RunnerType>().unwrap(), RunnerType::Remote);
        assert!("docker".parse::<RunnerType>().is_err());
    }
}
