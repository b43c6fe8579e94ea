use std::time::Duration;

use async_trait::async_trait;
use orchestrator_config::NotifyConfig;
use orchestrator_domain::{Node, NodeNotifier};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use tracing::{debug, warn};

/// 通过 HTTP 通知节点排空
///
/// `POST {url}/notifyWhenIdle`，请求体 `{"nodeId": <id>}`。
/// 非 2xx 视为失败，按指数退避重试至多 `max_attempts` 次。
pub struct HttpNodeNotifier {
    client: reqwest::Client,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl HttpNodeNotifier {
    pub fn new(max_attempts: u32, initial_backoff: Duration, request_timeout: Duration) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            initial_backoff,
        })
    }

    pub fn from_config(config: &NotifyConfig) -> SchedulerResult<Self> {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.request_timeout_ms),
        )
    }
}

#[async_trait]
impl NodeNotifier for HttpNodeNotifier {
    async fn notify_when_idle(&self, node: &Node) -> SchedulerResult<()> {
        let url = node.url.as_deref().ok_or_else(|| {
            SchedulerError::validation_error(format!("节点 {} 没有 URL", node.id))
        })?;
        let endpoint = format!("{}/notifyWhenIdle", url.trim_end_matches('/'));
        let body = serde_json::json!({ "nodeId": node.id });

        let mut backoff = self.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.client.post(&endpoint).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("已通知节点 {} 排空 (第 {} 次尝试)", node.id, attempt);
                    return Ok(());
                }
                Ok(response) => last_error = format!("HTTP {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }

            if attempt < self.max_attempts {
                warn!(
                    "通知节点 {} 失败 ({}/{}): {}, {:?} 后重试",
                    node.id, attempt, self.max_attempts, last_error, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        Err(SchedulerError::Network(format!(
            "通知节点 {} 失败, 已尝试 {} 次: {}",
            node.id, self.max_attempts, last_error
        )))
    }
}
