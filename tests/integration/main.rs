//! Integration test entry point
//!
//! Run with: ATHENA_NODE_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - ATHENA_NODE_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - ATHENA_NODE_TEST_MYSQL_HOST: Backend host (default: 127.0.0.1)
//! - ATHENA_NODE_TEST_MYSQL_PORT: Backend port (default: 3306)
//! - ATHENA_NODE_TEST_MYSQL_USER: Backend user (default: root)
//! - ATHENA_NODE_TEST_MYSQL_PASS: Backend password (default: empty)
//! - ATHENA_NODE_TEST_MYSQL_DB: Database used for test tables (default: test)
//!
//! The backend account must use `mysql_native_password`.

mod node;
mod transaction;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use athena_node::config::BackendConfig;
use athena_node::{BackendNode, ConnectionPool, MysqlConnector, ResourcePool, ResourcePoolConfig};
use mysql::prelude::*;
use mysql::{Conn, OptsBuilder};

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("ATHENA_NODE_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set ATHENA_NODE_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Backend connection settings from the environment
pub fn backend_config() -> BackendConfig {
    BackendConfig {
        host: env::var("ATHENA_NODE_TEST_MYSQL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("ATHENA_NODE_TEST_MYSQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env::var("ATHENA_NODE_TEST_MYSQL_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("ATHENA_NODE_TEST_MYSQL_PASS").unwrap_or_default(),
        database: Some(env::var("ATHENA_NODE_TEST_MYSQL_DB").unwrap_or_else(|_| "test".to_string())),
    }
}

/// A node over a real backend with a small pool
pub fn live_node(name: &str, capacity: usize) -> Arc<BackendNode> {
    let connector = Arc::new(MysqlConnector::new(backend_config()));
    let pool: Arc<dyn ConnectionPool> = Arc::new(
        ResourcePool::new(
            connector,
            ResourcePoolConfig {
                capacity,
                ..Default::default()
            },
        )
        .expect("valid pool config"),
    );
    BackendNode::new(name, None, Duration::from_secs(1), 2, pool)
}

/// Independent connection for verifying what the node did
pub fn verify_conn() -> Conn {
    let config = backend_config();
    let opts = OptsBuilder::new()
        .ip_or_hostname(Some(config.host))
        .tcp_port(config.port)
        .user(Some(config.user))
        .pass(Some(config.password))
        .db_name(config.database);
    Conn::new(opts).expect("Failed to connect for verification")
}

/// Create an empty `(id INT PRIMARY KEY, name VARCHAR(64))` table
pub fn fresh_table(conn: &mut Conn, table: &str) {
    conn.query_drop(format!("DROP TABLE IF EXISTS {}", table))
        .expect("DROP TABLE should succeed");
    conn.query_drop(format!(
        "CREATE TABLE {} (id INT PRIMARY KEY, name VARCHAR(64)) ENGINE=InnoDB",
        table
    ))
    .expect("CREATE TABLE should succeed");
}

pub fn count_rows(conn: &mut Conn, table: &str) -> u64 {
    conn.query_first(format!("SELECT COUNT(*) FROM {}", table))
        .expect("COUNT should succeed")
        .unwrap_or(0)
}
