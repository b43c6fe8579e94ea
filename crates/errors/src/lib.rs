use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("节点未找到: {id}")]
    NodeNotFound { id: i64 },
    #[error("无效的任务状态转换: {from} -> {to}")]
    InvalidTaskTransition { from: String, to: String },
    #[error("无效的节点状态转换: {from} -> {to}")]
    InvalidNodeTransition { from: String, to: String },
    #[error("没有活跃的部署")]
    NoActiveDeployment,
    #[error("无法获取集群锁: {0}")]
    LockUnavailable(String),
    #[error("节点提供者错误: {0}")]
    NodeProvider(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("内部错误: {0}")]
    Internal(String),
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("操作超时: {0}")]
    Timeout(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn node_not_found(id: i64) -> Self {
        Self::NodeNotFound { id }
    }
    pub fn invalid_task_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTaskTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn invalid_node_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidNodeTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn provider_error<S: Into<String>>(msg: S) -> Self {
        Self::NodeProvider(msg.into())
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn timeout_error<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// 启动期无法自愈的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Internal(_)
                | SchedulerError::Configuration(_)
                | SchedulerError::NoActiveDeployment
        )
    }

    /// 基础设施类瞬时错误，控制循环会在下一轮自然重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_)
                | SchedulerError::DatabaseOperation(_)
                | SchedulerError::NodeProvider(_)
                | SchedulerError::LockUnavailable(_)
                | SchedulerError::Network(_)
                | SchedulerError::Timeout(_)
        )
    }

    /// 调用方的意图本身有误，不应自动重试
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::TaskNotFound { .. }
                | SchedulerError::NodeNotFound { .. }
                | SchedulerError::InvalidTaskTransition { .. }
                | SchedulerError::InvalidNodeTransition { .. }
                | SchedulerError::InvalidTaskParams(_)
                | SchedulerError::ValidationError(_)
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            SchedulerError::TaskNotFound { .. } => "请求的任务不存在",
            SchedulerError::NodeNotFound { .. } => "请求的节点不存在",
            SchedulerError::InvalidTaskTransition { .. } => "任务当前状态不允许该操作",
            SchedulerError::InvalidNodeTransition { .. } => "节点当前状态不允许该操作",
            SchedulerError::InvalidTaskParams(_) => "任务参数配置有误",
            SchedulerError::ValidationError(_) => "输入数据验证失败",
            SchedulerError::NoActiveDeployment => "当前没有活跃的部署",
            SchedulerError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
