//! 外部协作方的端口定义

pub mod lock;
pub mod node_provider;
pub mod notifier;

pub use lock::{LockLease, LockManager};
pub use node_provider::NodeProvider;
pub use notifier::NodeNotifier;
