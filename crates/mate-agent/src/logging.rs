use crate::config::LoggingConfig;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Keeps the log file handle alive for the process lifetime.
pub struct LogGuard {
    _file: Option<Arc<Mutex<File>>>,
}

struct MultiWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

/// RUST_LOG wins over the configured level; an unwritable log file degrades
/// to stdout-only logging rather than failing startup.
pub fn init(config: &LoggingConfig) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let file = match open_log_file(&config.file) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    let writer_file = file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter {
        file: writer_file.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(LogGuard { _file: file })
}

fn open_log_file(path: &str) -> io::Result<Option<Arc<Mutex<File>>>> {
    if path.trim().is_empty() {
        return Ok(None);
    }
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Some(Arc::new(Mutex::new(file))))
}
