use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, OnceLock},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};

const LOG_FILE: &str = "operator.log";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(anyhow::anyhow!("unknown log level '{other}'")),
        }
    }
}

impl Level {
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

struct FileSink {
    writer: Mutex<File>,
    min_level: Level,
    path: PathBuf,
}

static SINK: OnceLock<FileSink> = OnceLock::new();

/// Opens `operator.log` under `log_dir`, or under `./logs` when that fails.
/// Returns the directory actually used.
pub fn init(log_dir: PathBuf, min_level: Level) -> anyhow::Result<PathBuf> {
    if let Some(existing) = SINK.get() {
        anyhow::bail!(
            "operator log already initialized at {}",
            existing.path.display()
        );
    }
    let fallback = std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("logs");
    let (dir, file) = match open_log(&log_dir) {
        Ok(file) => (log_dir, file),
        Err(primary) if fallback != log_dir => match open_log(&fallback) {
            Ok(file) => {
                eprintln!(
                    "unable to write {LOG_FILE} at {} ({primary}); falling back to {}",
                    log_dir.display(),
                    fallback.display()
                );
                (fallback, file)
            }
            Err(err) => {
                return Err(anyhow::anyhow!(
                    "unable to open operator log at {}: {err}",
                    fallback.display()
                ));
            }
        },
        Err(err) => {
            return Err(anyhow::anyhow!(
                "unable to open operator log at {}: {err}",
                log_dir.display()
            ));
        }
    };
    let sink = FileSink {
        writer: Mutex::new(file),
        min_level,
        path: dir.join(LOG_FILE),
    };
    if SINK.set(sink).is_err() {
        anyhow::bail!("operator log already initialized");
    }
    Ok(dir)
}

/// Installs a stderr `tracing` subscriber. Safe to call more than once; only
/// the first call wins.
pub fn init_tracing(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level.as_tracing())
        .with_writer(io::stderr)
        .try_init();
}

fn open_log(log_dir: &Path) -> io::Result<File> {
    std::fs::create_dir_all(log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE))
}

pub fn log(level: Level, target: &str, message: String) {
    match level {
        Level::Trace => tracing::trace!(module = target, "{message}"),
        Level::Debug => tracing::debug!(module = target, "{message}"),
        Level::Info => tracing::info!(module = target, "{message}"),
        Level::Warn => tracing::warn!(module = target, "{message}"),
        Level::Error => tracing::error!(module = target, "{message}"),
    }
    let Some(sink) = SINK.get() else {
        return;
    };
    if level < sink.min_level {
        return;
    }
    let Ok(mut writer) = sink.writer.lock() else {
        return;
    };
    let timestamp = Utc::now().to_rfc3339();
    if writeln!(writer, "{timestamp} [{level:?}] {target} - {message}").is_err() {
        let _ = writer.flush();
    }
}

pub fn trace(target: &str, message: impl AsRef<str>) {
    log(Level::Trace, target, message.as_ref().to_string());
}

pub fn debug(target: &str, message: impl AsRef<str>) {
    log(Level::Debug, target, message.as_ref().to_string());
}

pub fn info(target: &str, message: impl AsRef<str>) {
    log(Level::Info, target, message.as_ref().to_string());
}

pub fn warn(target: &str, message: impl AsRef<str>) {
    log(Level::Warn, target, message.as_ref().to_string());
}

pub fn error(target: &str, message: impl AsRef<str>) {
    log(Level::Error, target, message.as_ref().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn writes_operator_log_above_min_level() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let used = init(dir.path().to_path_buf(), Level::Info)?;
        assert_eq!(used, dir.path());
        debug("tests::operator_log", "quiet detail");
        info("tests::operator_log", "registry opened");
        let contents = fs::read_to_string(dir.path().join(LOG_FILE))?;
        assert!(contents.contains("registry opened"));
        assert!(!contents.contains("quiet detail"));
        assert!(init(dir.path().to_path_buf(), Level::Info).is_err());
        Ok(())
    }

    #[test]
    fn parses_level_names() {
        assert_eq!("WARNING".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert!("loud".parse::<Level>().is_err());
    }
}
