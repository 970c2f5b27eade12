use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_BASENAME: &str = "playcast.log";
const LOG_DIR_ENV: &str = "PLAYCAST_LOG_PATH";
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Subsystem for macOS unified logging (os_log).
#[cfg(target_os = "macos")]
const OSLOG_SUBSYSTEM: &str = "dev.playcast.recorder";

/// Get the log directory path
pub fn get_log_dir() -> Result<PathBuf> {
    resolve_log_dir()
}

/// Install the global subscriber: env filter, rolling file, os_log on macOS.
///
/// Keep the returned guard alive for the lifetime of the process or buffered
/// lines are lost.
pub fn init_logging() -> Result<WorkerGuard> {
    let log_dir = resolve_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;
    prune_old_logs(&log_dir, LOG_RETENTION);

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_BASENAME));

    // Hosts embedding the recorder may already own the global subscriber
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true),
        )
        .with(oslog_layer())
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(guard)
}

/// `log stream --predicate 'subsystem == "dev.playcast.recorder"'`
#[cfg(target_os = "macos")]
fn oslog_layer() -> Option<tracing_oslog::OsLogger> {
    Some(tracing_oslog::OsLogger::new(OSLOG_SUBSYSTEM, "default"))
}

#[cfg(not(target_os = "macos"))]
fn oslog_layer() -> Option<tracing_subscriber::layer::Identity> {
    None
}

fn resolve_log_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(LOG_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .context("Failed to determine home directory for log path")?;
        return Ok(home.join("Library").join("Logs").join("playcast"));
    }

    let proj_dirs = ProjectDirs::from("dev", "playcast", "recorder")
        .context("Failed to determine project directories for log path")?;

    #[cfg(target_os = "windows")]
    {
        return Ok(proj_dirs.data_local_dir().join("Logs"));
    }

    #[cfg(target_os = "linux")]
    {
        let base = proj_dirs
            .state_dir()
            .unwrap_or_else(|| proj_dirs.data_local_dir());
        return Ok(base.join("logs"));
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        return Ok(proj_dirs.data_local_dir().join("logs"));
    }
}

fn prune_old_logs(log_dir: &Path, max_age: Duration) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };

    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return;
    };

    for path in entries.flatten().map(|entry| entry.path()) {
        if is_expired_log(&path, cutoff) {
            let _ = std::fs::remove_file(&path);
        }
    }
}

fn is_expired_log(path: &Path, cutoff: SystemTime) -> bool {
    if !path.is_file() {
        return false;
    }

    let is_ours = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(LOG_FILE_BASENAME))
        .unwrap_or(false);
    if !is_ours {
        return false;
    }

    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map(|modified| modified < cutoff)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_our_old_files_count_as_expired() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join(format!("{}.2026-01-01", LOG_FILE_BASENAME));
        let foreign = dir.path().join("other.log");
        std::fs::write(&ours, "old").unwrap();
        std::fs::write(&foreign, "keep").unwrap();

        let future = SystemTime::now() + Duration::from_secs(60);
        let past = SystemTime::now() - Duration::from_secs(60);
        assert!(is_expired_log(&ours, future));
        assert!(!is_expired_log(&ours, past));
        assert!(!is_expired_log(&foreign, future));
        assert!(!is_expired_log(dir.path(), future));
    }
}
