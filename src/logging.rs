//! Console and activity-log setup

use crate::config::LoggingConfig;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Append-only log file that is moved to `<path>.1` once it reaches `max_bytes`
pub struct SizeCappedWriter {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl SizeCappedWriter {
    pub fn open(path: impl AsRef<Path>, max_bytes: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            file,
            written,
        })
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeCappedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Install the global subscriber: compact console output plus the activity log.
///
/// Returns false when a subscriber was already installed.
pub fn init_logging(verbose: bool, config: &LoggingConfig) -> bool {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn,hyper=warn", default_level)));

    let console = tracing_subscriber::fmt::layer().with_target(false).compact();

    let file_layer = config.file_path.as_ref().and_then(|path| {
        match SizeCappedWriter::open(path, config.max_bytes) {
            Ok(writer) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(writer);
                // flushed on exit as long as the guard lives
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
            }
            Err(e) => {
                eprintln!("Warning: could not open log file {} ({}), file logging disabled", path, e);
                None
            }
        }
    });

    match tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Warning: could not install log subscriber ({})", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotates_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot_activity.log");
        let mut writer = SizeCappedWriter::open(&path, 64).unwrap();

        writer.write_all(&[b'a'; 40]).unwrap();
        writer.write_all(&[b'b'; 40]).unwrap();
        writer.flush().unwrap();

        let backup = dir.path().join("bot_activity.log.1");
        assert_eq!(fs::read(&backup).unwrap(), vec![b'a'; 40]);
        assert_eq!(fs::read(&path).unwrap(), vec![b'b'; 40]);

        writer.write_all(&[b'c'; 40]).unwrap();
        writer.flush().unwrap();
        assert_eq!(fs::read(&backup).unwrap(), vec![b'b'; 40]);
    }

    #[test]
    fn test_reopen_counts_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.log");
        fs::write(&path, vec![b'x'; 60]).unwrap();

        let mut writer = SizeCappedWriter::open(&path, 64).unwrap();
        writer.write_all(b"hello world").unwrap();
        writer.flush().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello world".to_vec());
    }

    #[test]
    fn test_second_init_is_reported() {
        let config = LoggingConfig {
            file_path: None,
            max_bytes: 1024,
        };
        init_logging(false, &config);
        assert!(!init_logging(true, &config));
    }
}
