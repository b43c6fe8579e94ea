use crate::*;

#[test]
fn test_scheduler_error_display() {
    let db_op_error = SchedulerError::DatabaseOperation("Connection failed".to_string());
    assert_eq!(db_op_error.to_string(), "数据库操作错误: Connection failed");

    let task_error = SchedulerError::TaskNotFound {
        id: "0190b6a2-task".to_string(),
    };
    assert_eq!(task_error.to_string(), "任务未找到: 0190b6a2-task");

    let node_error = SchedulerError::NodeNotFound { id: 42 };
    assert_eq!(node_error.to_string(), "节点未找到: 42");

    let transition_error = SchedulerError::invalid_task_transition("SUCCEEDED", "STARTED");
    assert_eq!(
        transition_error.to_string(),
        "无效的任务状态转换: SUCCEEDED -> STARTED"
    );

    let node_transition = SchedulerError::invalid_node_transition("IDLE", "RUNNING");
    assert_eq!(
        node_transition.to_string(),
        "无效的节点状态转换: IDLE -> RUNNING"
    );

    assert_eq!(
        SchedulerError::NoActiveDeployment.to_string(),
        "没有活跃的部署"
    );

    let lock_error = SchedulerError::LockUnavailable("fleet_supervisor".to_string());
    assert_eq!(lock_error.to_string(), "无法获取集群锁: fleet_supervisor");

    let provider_error = SchedulerError::provider_error("container not found");
    assert_eq!(provider_error.to_string(), "节点提供者错误: container not found");

    let timeout_error = SchedulerError::Timeout("tick".to_string());
    assert_eq!(timeout_error.to_string(), "操作超时: tick");
}

#[test]
fn test_scheduler_error_creation_methods() {
    let error = SchedulerError::database_error("Connection failed");
    assert!(matches!(error, SchedulerError::DatabaseOperation(_)));

    let error = SchedulerError::task_not_found("abc");
    assert!(matches!(error, SchedulerError::TaskNotFound { ref id } if id == "abc"));

    let error = SchedulerError::node_not_found(7);
    assert!(matches!(error, SchedulerError::NodeNotFound { id: 7 }));

    let error = SchedulerError::invalid_params("Invalid parameter");
    assert!(matches!(error, SchedulerError::InvalidTaskParams(_)));

    let error = SchedulerError::config_error("Missing config");
    assert!(matches!(error, SchedulerError::Configuration(_)));

    let error = SchedulerError::validation_error("Invalid input");
    assert!(matches!(error, SchedulerError::ValidationError(_)));

    let error = SchedulerError::timeout_error("Operation timed out");
    assert!(matches!(error, SchedulerError::Timeout(_)));
}

#[test]
fn test_is_fatal() {
    assert!(SchedulerError::Internal("Critical error".to_string()).is_fatal());
    assert!(SchedulerError::Configuration("Invalid config".to_string()).is_fatal());
    assert!(SchedulerError::NoActiveDeployment.is_fatal());

    assert!(!SchedulerError::task_not_found("x").is_fatal());
    assert!(!SchedulerError::Network("Connection failed".to_string()).is_fatal());
    assert!(!SchedulerError::LockUnavailable("busy".to_string()).is_fatal());
}

#[test]
fn test_is_retryable() {
    assert!(SchedulerError::DatabaseOperation("Temporary failure".to_string()).is_retryable());
    assert!(SchedulerError::NodeProvider("quota".to_string()).is_retryable());
    assert!(SchedulerError::LockUnavailable("busy".to_string()).is_retryable());
    assert!(SchedulerError::Network("Connection timeout".to_string()).is_retryable());
    assert!(SchedulerError::Timeout("Operation timeout".to_string()).is_retryable());

    assert!(!SchedulerError::task_not_found("x").is_retryable());
    assert!(!SchedulerError::invalid_task_transition("CREATED", "SUCCEEDED").is_retryable());
    assert!(!SchedulerError::Configuration("Invalid config".to_string()).is_retryable());
    assert!(!SchedulerError::NoActiveDeployment.is_retryable());
}

#[test]
fn test_is_validation() {
    assert!(SchedulerError::task_not_found("x").is_validation());
    assert!(SchedulerError::node_not_found(1).is_validation());
    assert!(SchedulerError::invalid_task_transition("CREATED", "FAILED").is_validation());
    assert!(SchedulerError::invalid_node_transition("IDLE", "RUNNING").is_validation());
    assert!(!SchedulerError::Network("down".to_string()).is_validation());
}

#[test]
fn test_user_message() {
    assert_eq!(
        SchedulerError::task_not_found("x").user_message(),
        "请求的任务不存在"
    );
    assert_eq!(
        SchedulerError::node_not_found(1).user_message(),
        "请求的节点不存在"
    );
    assert_eq!(
        SchedulerError::invalid_task_transition("CREATED", "FAILED").user_message(),
        "任务当前状态不允许该操作"
    );
    assert_eq!(
        SchedulerError::Internal("boom".to_string()).user_message(),
        "系统繁忙，请稍后重试"
    );
}

#[test]
fn test_error_conversion_from_serde_json() {
    let json_error = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let error: SchedulerError = json_error.into();
    assert!(matches!(error, SchedulerError::Serialization(_)));
}

#[test]
fn test_error_conversion_from_anyhow() {
    let error: SchedulerError = anyhow::anyhow!("wrapped").into();
    assert!(matches!(error, SchedulerError::Internal(ref msg) if msg == "wrapped"));
}

#[test]
fn test_error_conversion_from_sqlx() {
    let error: SchedulerError = sqlx::Error::RowNotFound.into();
    assert!(matches!(error, SchedulerError::Database(_)));
    assert!(error.is_retryable());
}
