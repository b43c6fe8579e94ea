use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 任务调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 超时扫描周期
    pub expiry_interval_ms: u64,
    pub default_list_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry_interval_ms: 1000,
            default_list_limit: 100,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_duration_ms(self.expiry_interval_ms, "scheduler.expiry_interval_ms")?;
        if self.default_list_limit <= 0 {
            return Err(crate::ConfigError::Validation(
                "scheduler.default_list_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
