//! 本地进程节点提供者
//!
//! 每个节点对应一个子进程，通过环境变量 `NODE_ID`、`ROUTING_ID`、`PORT`
//! 告知节点身份。`start` 与 `terminate` 都是幂等的。

use std::collections::HashMap;

use async_trait::async_trait;
use orchestrator_config::LocalProviderConfig;
use orchestrator_domain::{Node, NodeProvider};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct LocalNodeProvider {
    program: String,
    args: Vec<String>,
    base_port: u16,
    processes: Mutex<HashMap<i64, Child>>,
}

impl LocalNodeProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>, base_port: u16) -> Self {
        Self {
            program: program.into(),
            args,
            base_port,
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &LocalProviderConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.base_port)
    }

    /// 节点端口按 ID 在 1000 个端口范围内轮转
    pub fn port_for(&self, node: &Node) -> u16 {
        self.base_port.saturating_add((node.id.rem_euclid(1000)) as u16)
    }

    pub async fn running_count(&self) -> usize {
        let mut processes = self.processes.lock().await;
        processes.retain(|_, child| matches!(child.try_wait(), Ok(None)));
        processes.len()
    }
}

#[async_trait]
impl NodeProvider for LocalNodeProvider {
    async fn start(&self, node: &Node) -> SchedulerResult<()> {
        let mut processes = self.processes.lock().await;

        if let Some(child) = processes.get_mut(&node.id) {
            if matches!(child.try_wait(), Ok(None)) {
                return Ok(());
            }
        }

        let port = self.port_for(node);
        let child = Command::new(&self.program)
            .args(&self.args)
            .env("NODE_ID", node.id.to_string())
            .env("ROUTING_ID", &node.routing_id)
            .env("PORT", port.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SchedulerError::provider_error(format!(
                    "启动本地节点 {} 失败 ({}): {e}",
                    node.id, self.program
                ))
            })?;

        info!("本地节点 {} 已启动, 端口 {}, pid {:?}", node.id, port, child.id());
        processes.insert(node.id, child);
        Ok(())
    }

    async fn terminate(&self, node: &Node) -> SchedulerResult<()> {
        let Some(mut child) = self.processes.lock().await.remove(&node.id) else {
            return Ok(());
        };

        if !matches!(child.try_wait(), Ok(None)) {
            return Ok(());
        }

        if let Err(e) = child.kill().await {
            warn!("终止本地节点 {} 失败: {}", node.id, e);
            return Err(SchedulerError::provider_error(format!(
                "终止本地节点 {} 失败: {e}",
                node.id
            )));
        }
        info!("本地节点 {} 已终止", node.id);
        Ok(())
    }
}
