//! # Structured Logging Module
//!
//! Environment-aware structured logging for the dispatcher. Console output
//! is human-readable by default and JSON when configured.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ConfigManager, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging() {
    init_structured_logging_with(&LoggingConfig::default());
}

/// Initialize structured logging from configuration.
///
/// `RUST_LOG` beats `logging.level`, which beats the environment default.
/// Only the first call has any effect.
pub fn init_structured_logging_with(logging: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let default_level = logging
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment).to_string());

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.clone()));

        let json_layer = logging.json.then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
        });
        let console_layer = (!logging.json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .with(console_layer);

        // Another global subscriber (a test harness, an embedding service) is fine
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
            return;
        }

        tracing::info!(
            environment = %environment,
            level = %default_level,
            json = logging.json,
            "Structured logging initialized"
        );
    });
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for job operations
pub fn log_job_operation(
    operation: &str,
    job_id: Option<i64>,
    execution_id: Option<i64>,
    runner_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id,
        execution_id = execution_id,
        runner_id = runner_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}

/// Log structured data for execution operations
pub fn log_execution_operation(
    operation: &str,
    execution_id: Option<i64>,
    action_id: Option<i64>,
    campaign_plan_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = execution_id,
        action_id = action_id,
        campaign_plan_id = campaign_plan_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "EXECUTION_OPERATION"
    );
}
