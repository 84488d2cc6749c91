use std::io;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialise tracing on stdout, plus an hourly rolling file when `log_dir` is set
///
/// `RUST_LOG` takes precedence over `default_level`. Keep the returned guard
/// alive for the lifetime of the process or buffered file output is lost.
pub fn init(app_name: &str, log_dir: Option<&str>, default_level: Level) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

    let stdout_layer = fmt::layer().with_writer(io::stdout).with_target(true).with_thread_ids(true).with_ansi(true).compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = tracing_appender::rolling::hourly(dir, format!("{app_name}.log"));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer =
                fmt::layer().with_writer(non_blocking).with_target(true).with_thread_ids(true).with_line_number(true).with_ansi(false).compact();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry().with(env_filter).with(stdout_layer).with(file_layer).try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_file_output() {
        let dir = std::env::temp_dir().join(format!("rc_app_logs_{}", std::process::id()));
        let dir_str = dir.to_string_lossy().to_string();

        let guard = init("rc_test", Some(&dir_str), Level::DEBUG);
        tracing::info!("written to file");

        assert!(guard.is_some());
        assert!(dir.is_dir());

        drop(guard);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_init_stdout_only_twice() {
        assert!(init("rc_test", None, Level::INFO).is_none());
        assert!(init("rc_test", None, Level::INFO).is_none());
    }
}
