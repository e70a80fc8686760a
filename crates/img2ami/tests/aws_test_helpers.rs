//! Shared utilities for AWS integration tests

use chrono::Utc;

/// AWS region for tests: `AWS_REGION`, then `AWS_DEFAULT_REGION`, then us-east-2
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-2".to_string())
}

/// Unique run id for test resources (`test-{unix seconds}`)
pub fn test_run_id() -> String {
    format!("test-{}", Utc::now().timestamp())
}
