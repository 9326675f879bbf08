//! Logging infrastructure
//!
//! Console output plus, when a log directory is given, daily rolling files
//! split by target:
//! - `app/` application logs, removed after 14 days
//! - `audit/` events logged with `target: "audit"`, kept
//! - `payment/` gateway and webhook decisions (`target: "payment"`), kept
//! - `security/` authentication failures (`target: "security"`), kept

use chrono::{Local, NaiveDate};
use std::fs;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter, fmt, prelude::*};

/// Targets routed to their own permanent files
const DEDICATED_TARGETS: [&str; 3] = ["audit", "payment", "security"];
const APP_LOG_PREFIX: &str = "app";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
///
/// `level` is used when `RUST_LOG` is unset.
pub fn init_logger_with_file(level: &str, json: bool, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_line_number(true).boxed()
    });

    if let Some(dir) = log_dir {
        fs::create_dir_all(dir)?;

        let app_dir = dir.join(APP_LOG_PREFIX);
        fs::create_dir_all(&app_dir)?;
        let app_log = RollingFileAppender::new(Rotation::DAILY, &app_dir, APP_LOG_PREFIX);
        layers.push(
            fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::sync::Mutex::new(app_log))
                .with_filter(filter::filter_fn(|meta| {
                    !DEDICATED_TARGETS.contains(&meta.target())
                }))
                .boxed(),
        );

        for target in DEDICATED_TARGETS {
            let target_dir = dir.join(target);
            fs::create_dir_all(&target_dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, &target_dir, target);
            layers.push(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::sync::Mutex::new(appender))
                    .with_filter(filter::filter_fn(move |meta| meta.target() == target))
                    .boxed(),
            );
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;
    Ok(())
}

/// Delete `app/app.YYYY-MM-DD` files older than `days`, returns how many
pub fn cleanup_old_logs(log_dir: &Path, days: u64) -> std::io::Result<usize> {
    let app_dir = log_dir.join(APP_LOG_PREFIX);
    if !app_dir.exists() {
        return Ok(0);
    }
    let cutoff = Local::now().date_naive() - chrono::Duration::days(days as i64);

    let mut removed = 0;
    for entry in fs::read_dir(&app_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let date = name
            .strip_prefix(APP_LOG_PREFIX)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        if let Some(date) = date
            && date < cutoff
        {
            fs::remove_file(&path)?;
            tracing::info!(file = %name, "Deleted old log file");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_removes_only_expired_app_logs() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("app");
        fs::create_dir_all(&app_dir).unwrap();

        let today = Local::now().date_naive();
        let old = today - chrono::Duration::days(30);
        let old_file = app_dir.join(format!("app.{}", old.format("%Y-%m-%d")));
        let new_file = app_dir.join(format!("app.{}", today.format("%Y-%m-%d")));
        let other = app_dir.join("notes.txt");
        for f in [&old_file, &new_file, &other] {
            fs::write(f, b"x").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path(), 14).unwrap(), 1);
        assert!(!old_file.exists());
        assert!(new_file.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_cleanup_without_app_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), 14).unwrap(), 0);
    }
}
