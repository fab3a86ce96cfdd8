use crate::config::RuntimeConfig;
use std::{
    env,
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const LOG_FILE_NAME: &str = "affina-overlay.log";

/// Keeps the log file handle alive for the lifetime of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stderr_enabled: bool,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Installs the global subscriber. Stdout belongs to the host bridge, so
/// diagnostics only ever go to stderr and the optional log file.
pub fn init_logging(config: &RuntimeConfig) -> Option<LogGuard> {
    let level = env::var("AFFINA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(&config.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let stderr_enabled = config.log_stderr;
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stderr_enabled));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>, stderr_enabled: bool) -> Self {
        Self {
            stderr_enabled,
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr_enabled {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stderr_enabled {
            let _ = io::stderr().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_dir_disables_file_output() {
        let guard = open_log_file("  ").expect("guard");
        assert!(guard.file.is_none());
    }

    #[test]
    fn writer_appends_to_log_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let guard = open_log_file(&dir.path().to_string_lossy()).expect("guard");
        let mut writer = MultiWriter::new(guard.file.clone(), false);
        writer.write_all(b"stream_connected\n").expect("write");
        writer.flush().expect("flush");
        let content = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).expect("read");
        assert_eq!(content, "stream_connected\n");
    }
}
