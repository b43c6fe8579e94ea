//! # Orchestrator Testing Utils
//!
//! Shared testing utilities for the scheduler and fleet crates.
//!
//! ## Features
//!
//! - **Mock Ports**: recording test doubles for `NodeProvider`, `NodeNotifier`
//!   and `LockManager` with switchable failures
//! - **Test Data Builders**: `TaskBuilder`, `NodeBuilder`, `DeploymentBuilder`
//! - **SQLite Test Database**: migrated in-memory database with seeding helpers
//! - **PostgreSQL Test Container**: requires Docker
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
