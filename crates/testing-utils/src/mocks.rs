//! Recording test doubles for the fleet ports
//!
//! Every mock is cheap to clone; clones share the same recorded calls, so a
//! test can hand one clone to the code under test and inspect another.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_domain::{LockLease, LockManager, Node, NodeNotifier, NodeProvider};
use orchestrator_errors::{SchedulerError, SchedulerResult};

/// Mock implementation of NodeProvider for testing
#[derive(Debug, Clone, Default)]
pub struct MockNodeProvider {
    started: Arc<Mutex<Vec<i64>>>,
    terminated: Arc<Mutex<Vec<i64>>>,
    fail_start: Arc<Mutex<bool>>,
    fail_terminate: Arc<Mutex<bool>>,
    start_delay: Arc<Mutex<Duration>>,
}

impl MockNodeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_start(&self, fail: bool) {
        *self.fail_start.lock().unwrap() = fail;
    }

    pub fn set_fail_terminate(&self, fail: bool) {
        *self.fail_terminate.lock().unwrap() = fail;
    }

    /// Make every `start` call take at least `delay`
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    pub fn started_ids(&self) -> Vec<i64> {
        self.started.lock().unwrap().clone()
    }

    pub fn terminated_ids(&self) -> Vec<i64> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeProvider for MockNodeProvider {
    async fn start(&self, node: &Node) -> SchedulerResult<()> {
        let delay = *self.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_start.lock().unwrap() {
            return Err(SchedulerError::provider_error(format!(
                "mock start failure for node {}",
                node.id
            )));
        }
        self.started.lock().unwrap().push(node.id);
        Ok(())
    }

    async fn terminate(&self, node: &Node) -> SchedulerResult<()> {
        if *self.fail_terminate.lock().unwrap() {
            return Err(SchedulerError::provider_error(format!(
                "mock terminate failure for node {}",
                node.id
            )));
        }
        self.terminated.lock().unwrap().push(node.id);
        Ok(())
    }
}

/// Mock implementation of NodeNotifier for testing
#[derive(Debug, Clone, Default)]
pub struct MockNodeNotifier {
    notified: Arc<Mutex<Vec<i64>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockNodeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn notified_ids(&self) -> Vec<i64> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeNotifier for MockNodeNotifier {
    async fn notify_when_idle(&self, node: &Node) -> SchedulerResult<()> {
        self.notified.lock().unwrap().push(node.id);
        if *self.fail.lock().unwrap() {
            return Err(SchedulerError::Network(format!(
                "mock notification failure for node {}",
                node.id
            )));
        }
        Ok(())
    }
}

/// In-process lock manager; a key can be held by one lease at a time
#[derive(Debug, Clone, Default)]
pub struct MockLockManager {
    held: Arc<Mutex<HashSet<String>>>,
    unavailable: Arc<Mutex<bool>>,
    acquisitions: Arc<Mutex<usize>>,
}

impl MockLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate another instance holding every lock
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().unwrap().contains(key)
    }

    pub fn acquisitions(&self) -> usize {
        *self.acquisitions.lock().unwrap()
    }
}

#[async_trait]
impl LockManager for MockLockManager {
    async fn try_acquire(
        &self,
        key: &str,
        _hold: Duration,
    ) -> SchedulerResult<Option<Box<dyn LockLease>>> {
        if *self.unavailable.lock().unwrap() {
            return Ok(None);
        }
        if !self.held.lock().unwrap().insert(key.to_string()) {
            return Ok(None);
        }
        *self.acquisitions.lock().unwrap() += 1;
        Ok(Some(Box::new(MockLockLease {
            key: key.to_string(),
            held: self.held.clone(),
        })))
    }
}

struct MockLockLease {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl LockLease for MockLockLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> SchedulerResult<()> {
        drop(self);
        Ok(())
    }
}

/// A dropped lease frees its key, like a rolled-back transaction lock
impl Drop for MockLockLease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::NodeBuilder;

    #[tokio::test]
    async fn test_mock_provider_records_calls() {
        let provider = MockNodeProvider::new();
        let node = NodeBuilder::new().with_id(3).build();

        provider.start(&node).await.unwrap();
        provider.terminate(&node).await.unwrap();
        assert_eq!(provider.started_ids(), vec![3]);
        assert_eq!(provider.terminated_ids(), vec![3]);

        provider.set_fail_start(true);
        assert!(provider.start(&node).await.is_err());
        assert_eq!(provider.started_ids(), vec![3]);
    }

    #[tokio::test]
    async fn test_mock_lock_is_exclusive() {
        let locks = MockLockManager::new();
        let hold = Duration::from_secs(1);

        let lease = locks.try_acquire("k", hold).await.unwrap().unwrap();
        assert!(locks.is_held("k"));
        assert!(locks.try_acquire("k", hold).await.unwrap().is_none());

        lease.release().await.unwrap();
        assert!(!locks.is_held("k"));

        let dropped = locks.try_acquire("k", hold).await.unwrap().unwrap();
        drop(dropped);
        assert!(!locks.is_held("k"));

        locks.set_unavailable(true);
        assert!(locks.try_acquire("k", hold).await.unwrap().is_none());
        assert_eq!(locks.acquisitions(), 2);
    }
}
