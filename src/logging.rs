use std::{path::PathBuf, sync::Mutex};

use tokio::sync::RwLock;
use tracing::{debug, info, metadata::LevelFilter, trace, Level};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Keeps the file writer thread alive. Dropping it flushes what is buffered.
static FILE_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) -> Option<WorkerGuard> {
    let mut message = String::from("Logging with: stdout");

    // RUST_LOG may narrow things down further, e.g. `port_hub::hub=trace`.
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(stdout_level).into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let (maybe_file_layer, guard) = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, "port-hub.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        (Some(file_layer), Some(guard))
    } else {
        (None, None)
    };

    registry.with(maybe_file_layer).init();

    debug!(message);

    guard
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub async fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        let guard = do_init(stdout_level, file_logging);
        *FILE_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = guard;

        *initialized = true;
    }

    info!("Logging initialized");
}

/// Flush file logging. Logging to file stops after this.
pub fn shutdown() {
    trace!("Shutting down");

    let guard = FILE_GUARD
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    drop(guard);
}

#[cfg(test)]
mod tests {
    use tracing::warn;

    use super::*;

    #[tokio::test]
    async fn file_log_is_flushed_on_shutdown() {
        let dir = std::env::temp_dir().join(format!("port-hub-logs-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        init(Level::WARN, Some((Level::INFO, dir.clone()))).await;
        warn!("Written before shutdown");
        shutdown();

        let contents = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect::<String>();
        assert!(contents.contains("Written before shutdown"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
