use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::error_handling::{Result, SpiderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
        }
    }
}

/// Console plus optional per-run file logging.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: LogLevel,
    console: bool,
    file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self { level: LogLevel::Info, console: true, file: None }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    pub fn file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// `<log_dir>/<%Y%m%d_%H%M%S>.<tool>.log`
pub fn run_log_path(log_dir: &Path, tool: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    log_dir.join(format!("{}.{}.log", stamp, tool))
}

pub fn init_logging(config: &LogConfig) -> Result<()> {
    let console_layer = config.console.then(|| fmt::layer().with_target(false));

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(LevelFilter::from(config.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SpiderError::Config(format!("Failed to initialise logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_path_is_timestamped_per_tool() {
        let path = run_log_path(Path::new("logs"), "spider");
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(path.starts_with("logs"));
        assert!(name.ends_with(".spider.log"));
        // 20190101_120000
        assert_eq!(name.len(), "20190101_120000.spider.log".len());
    }
}
