// Walnut - EVM Transaction Debugger
// Copyright (C) 2025 The Walnut Team
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Logging configuration for Walnut components
//!
//! Console output goes through a coloured `fmt` layer; optionally a second,
//! uncoloured layer writes to a daily rolling file under
//! `$TMP/walnut-logs/<component>/`. `RUST_LOG` is honoured everywhere.

use std::{env, fs, path::PathBuf, sync::Once};

use eyre::Result;
use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Keeps the file writer's worker alive for the lifetime of the process.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Directory name under the system temp dir that holds all log files.
pub const LOG_DIR_NAME: &str = "walnut-logs";

/// Initialize logging for a Walnut component
///
/// # Arguments
/// * `component_name` - Name of the component (e.g. "walnut")
/// * `enable_file_logging` - Whether to also write a daily rolling log file
///
/// # Examples
/// ```rust,no_run
/// use walnut_common::logging;
///
/// fn main() -> eyre::Result<()> {
///     logging::init_logging("walnut", true)?;
///     tracing::info!("service started");
///     Ok(())
/// }
/// ```
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let env_filter = default_filter(Level::INFO)?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true);

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;
        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (writer, guard) = non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(writer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer.with_filter(filter_for_console()?))
            .with(file_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer.with_filter(filter_for_console()?))
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
    }

    tracing::debug!(
        component = component_name,
        rust_log = %env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        "Environment information"
    );

    Ok(())
}

/// `RUST_LOG` if set and valid, `level` otherwise.
fn default_filter(level: Level) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .map_err(|e| eyre::eyre!("Failed to create environment filter: {}", e))
}

fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join(LOG_DIR_NAME).join(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

/// Console filter: everything `RUST_LOG` allows, minus HTTP client/server noise.
fn filter_for_console() -> Result<EnvFilter> {
    let mut filter = default_filter(Level::INFO)?;
    for directive in ["tower_http=warn", "hyper=warn", "hyper_util=warn", "reqwest=warn"] {
        filter = filter.add_directive(
            directive.parse().map_err(|e| eyre::eyre!("Invalid log directive: {}", e))?,
        );
    }
    Ok(filter)
}

/// Initialize console-only compact logging.
pub fn init_simple_logging(level: Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter(level)?)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {}", e))
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Logging for tests; safe to call from every test, only the first call
/// installs a subscriber.
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        // Another subscriber may already be installed; that is fine for tests.
        let _ = init_simple_logging(default_level.unwrap_or(Level::INFO));
    });
}
