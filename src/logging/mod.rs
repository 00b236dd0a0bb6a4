/*!
 * Logging Module
 * Centralized logging configuration and utilities
 */
pub mod middleware;

use std::io;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;

/// Background writer guards. Dropping them flushes and stops the log
/// writer threads, so keep them alive until the process exits.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Initialize the logging system
pub fn init(config: &AppConfig) -> LogGuards {
    let is_production = config.is_production();

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(&config.log_dir).ok();

    // File appender for all logs
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (file_writer, file_guard) = non_blocking(file_appender);

    // File appender for errors only
    let error_appender = rolling::daily(&config.log_dir, "error.log");
    let (error_writer, error_guard) = non_blocking(error_appender);

    // Console writer
    let (console_writer, console_guard) = non_blocking(io::stdout());

    let log_level = config.log_level.clone().unwrap_or_else(|| {
        if is_production {
            "info".to_string()
        } else {
            "debug".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "profile_sync={},tower_http=debug,axum=debug,notify=warn",
            log_level
        ))
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if is_production {
        // JSON format for production
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        let error_layer = fmt::layer()
            .json()
            .with_writer(error_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

        let console_layer = fmt::layer()
            .json()
            .with_writer(console_writer)
            .with_target(false);

        subscriber
            .with(file_layer)
            .with(error_layer)
            .with(console_layer)
            .init();
    } else {
        // Pretty console, plain-text file
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_target(true)
            .pretty();

        subscriber.with(file_layer).with(console_layer).init();
    }

    tracing::info!(
        environment = %config.environment,
        log_dir = %config.log_dir.display(),
        "logging initialized"
    );

    LogGuards {
        _guards: vec![file_guard, error_guard, console_guard],
    }
}

/// Console-only logging for command-line tools.
pub fn init_cli() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("profile_sync=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}
