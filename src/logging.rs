use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Keeps the file writer alive. Dropping it flushes pending lines and closes the file.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn init(cfg: &LoggingConfig, level_override: Option<&str>) -> Result<LogGuard> {
    let level = level_override.unwrap_or(cfg.level.as_str());
    let configured = level_filter(level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(configured);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(true)
        .boxed();

    let (file_layer, guard) = if cfg.write_to_file {
        let path = Path::new(&cfg.file_path);
        let file = RotatingFile::open(path, cfg.max_bytes, cfg.backups)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(LogGuard { _file: guard })
}

/// Parses a configured level such as `info` or a directive list such as
/// `debug,sqlx=warn`. A bare word must be a real level name.
fn level_filter(level: &str) -> Result<EnvFilter> {
    let level = level.trim();
    if !level.contains(['=', ',']) {
        level
            .parse::<LevelFilter>()
            .map_err(|_| anyhow!("unknown log level: {level:?}"))?;
    }
    EnvFilter::try_new(level).with_context(|| format!("invalid log filter: {level:?}"))
}

/// Append-only log file that rolls over to `<path>.1 .. <path>.N` once it
/// would grow past `max_bytes`. The oldest archive is discarded.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn archive(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backups == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for index in (1..self.backups).rev() {
                let from = self.archive(index);
                if from.exists() {
                    std::fs::rename(&from, self.archive(index + 1))?;
                }
            }
            std::fs::rename(&self.path, self.archive(1))?;
            self.file = append(&self.path)?;
        }

        self.written = 0;
        Ok(())
    }
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFile {
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
