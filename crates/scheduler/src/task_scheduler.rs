//! 任务调度器
//!
//! 任务状态机的对外入口。所有需要原子性的操作都委托给 [`TaskRepository`]，
//! 这里负责参数校验、转换表校验以及失败后的重试调度。

use std::sync::Arc;

use orchestrator_domain::{
    Clock, Task, TaskFilter, TaskProps, TaskRepository, TaskState, DEFAULT_LIST_LIMIT,
};
use orchestrator_errors::{SchedulerError, SchedulerResult};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

/// 失败的任务以及为其安排的重试
#[derive(Debug, Clone)]
pub struct FailedTask {
    pub task: Task,
    pub retry: Option<Task>,
}

pub struct TaskScheduler {
    tasks: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
    default_list_limit: i64,
}

impl TaskScheduler {
    pub fn new(tasks: Arc<dyn TaskRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks,
            clock,
            default_list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_default_list_limit(mut self, limit: i64) -> Self {
        self.default_list_limit = limit;
        self
    }

    /// 创建 CREATED 状态的任务
    #[instrument(skip(self, props), fields(name = %props.name, group_key = %props.group_key))]
    pub async fn create(&self, props: TaskProps) -> SchedulerResult<Task> {
        Self::validate_props(&props)?;
        let task = Task::new(props, self.clock.now());
        let created = self.tasks.create(&task).await?;
        debug!("已创建{}", created.entity_description());
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> SchedulerResult<Task> {
        self.tasks
            .get_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(id))
    }

    /// 按任务 ID 升序列出任务，未指定 limit 时使用默认值
    pub async fn list(&self, filter: TaskFilter) -> SchedulerResult<Vec<Task>> {
        let limit = filter.limit.unwrap_or(self.default_list_limit);
        if limit <= 0 {
            return Err(SchedulerError::validation_error("limit 必须大于 0"));
        }
        self.tasks
            .list(&TaskFilter {
                limit: Some(limit),
                ..filter
            })
            .await
    }

    /// 刷新心跳时间，不改变状态
    pub async fn heartbeat(&self, id: &str) -> SchedulerResult<Task> {
        self.tasks
            .heartbeat(id, self.clock.now())
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(id))
    }

    /// 将任务转换到新状态
    ///
    /// 进入终止状态时必须提供 `output`，非终止状态的 `output` 会被忽略。
    ///
    /// # 错误
    ///
    /// * `TaskNotFound` - 任务不存在
    /// * `InvalidTaskTransition` - 转换不在状态表中，或状态已被并发修改
    /// * `ValidationError` - 终止状态缺少 output
    #[instrument(skip(self, output), fields(task_id = %id, to = %new_state))]
    pub async fn transition_state(
        &self,
        id: &str,
        new_state: TaskState,
        output: Option<JsonValue>,
    ) -> SchedulerResult<Task> {
        let task = self.get(id).await?;
        if !task.state.can_transition_to(new_state) {
            return Err(SchedulerError::invalid_task_transition(task.state, new_state));
        }

        let output = if new_state.is_terminal() {
            Some(output.ok_or_else(|| {
                SchedulerError::validation_error(format!("转换到 {new_state} 时必须提供 output"))
            })?)
        } else {
            None
        };

        let updated = self
            .tasks
            .compare_and_transition(id, task.state, new_state, output.as_ref(), self.clock.now())
            .await?;

        match updated {
            Some(updated) => {
                debug!("任务 {} 状态转换: {} -> {}", id, task.state, new_state);
                Ok(updated)
            }
            None => {
                let current = self.get(id).await?;
                Err(SchedulerError::invalid_task_transition(current.state, new_state))
            }
        }
    }

    /// 领取分组内至多 `limit` 个可执行任务
    pub async fn dequeue(&self, group_key: &str, limit: i64) -> SchedulerResult<Vec<Task>> {
        if limit < 0 {
            return Err(SchedulerError::validation_error("limit 不能为负数"));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let tasks = self.tasks.dequeue(group_key, limit, self.clock.now()).await?;
        if !tasks.is_empty() {
            debug!("分组 {} 领取了 {} 个任务", group_key, tasks.len());
        }
        Ok(tasks)
    }

    /// 将所有超时任务置为 EXPIRED
    pub async fn expires_if_timeout(&self) -> SchedulerResult<Vec<Task>> {
        let expired = self.tasks.expire_timed_out(self.clock.now()).await?;
        for task in &expired {
            warn!(
                "{}已超时: {}",
                task.entity_description(),
                task.output
                    .as_ref()
                    .and_then(|o| o.get("reason"))
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown")
            );
        }
        Ok(expired)
    }

    pub async fn succeed(&self, id: &str, output: JsonValue) -> SchedulerResult<Task> {
        self.transition_state(id, TaskState::Succeeded, Some(output)).await
    }

    /// 标记任务失败，重试次数未用完时安排一次重试
    pub async fn fail(&self, id: &str, error: JsonValue) -> SchedulerResult<FailedTask> {
        let task = self.transition_state(id, TaskState::Failed, Some(error)).await?;
        let retry = self.retry(&task).await?;
        Ok(FailedTask { task, retry })
    }

    pub async fn cancel(&self, id: &str, reason: &str) -> SchedulerResult<Task> {
        self.transition_state(id, TaskState::Cancelled, Some(serde_json::json!({ "reason": reason })))
            .await
    }

    /// 为 FAILED 或 EXPIRED 的任务创建重试任务
    ///
    /// 其他状态或重试次数已用完时返回 `None`。
    pub async fn retry(&self, task: &Task) -> SchedulerResult<Option<Task>> {
        if !matches!(task.state, TaskState::Failed | TaskState::Expired) || !task.can_retry() {
            return Ok(None);
        }
        let retry = self.create(task.retry_props(self.clock.now())).await?;
        info!(
            "{}将重试 ({}/{}), 新任务 ID: {}",
            task.entity_description(),
            retry.retry_count,
            retry.retry_max,
            retry.id
        );
        Ok(Some(retry))
    }

    fn validate_props(props: &TaskProps) -> SchedulerResult<()> {
        if props.name.trim().is_empty() {
            return Err(SchedulerError::invalid_params("任务名称不能为空"));
        }
        if props.group_key.trim().is_empty() {
            return Err(SchedulerError::invalid_params("任务分组不能为空"));
        }
        if props.retry_max < 0 || props.retry_count < 0 {
            return Err(SchedulerError::invalid_params("重试次数不能为负数"));
        }
        let timeouts = [
            props.created_to_started_timeout_secs,
            props.started_to_completed_timeout_secs,
            props.heartbeat_timeout_secs,
        ];
        if timeouts.iter().any(|t| *t <= 0) {
            return Err(SchedulerError::invalid_params("超时时间必须大于 0"));
        }
        Ok(())
    }
}
