use chrono::Utc;
use slog::Drain;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Root logger writing to the terminal, tagged with `process_id`.
pub fn create_root_logger_for_stdout(process_id: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("ProcessId" => process_id))
}

/// Root logger writing to `<directory>/info_log_<process_id>/<utc timestamp>_info.log`. The
/// directory is created if needed.
pub fn create_root_logger_for_file(directory: &Path, process_id: String) -> io::Result<slog::Logger> {
    let log_path = log_file_path(directory, &process_id);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!("ProcessId" => process_id)))
}

fn log_file_path(directory: &Path, process_id: &str) -> PathBuf {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    directory
        .join(format!("info_log_{}", process_id))
        .join(format!("{}_info.log", now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_lands_in_per_process_directory() {
        let path = log_file_path(Path::new("/tmp/logs"), "coordinator");

        assert!(path.starts_with("/tmp/logs/info_log_coordinator"));
        assert!(path.to_string_lossy().ends_with("_info.log"));
    }
}
