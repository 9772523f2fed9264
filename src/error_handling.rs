use colored::Colorize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SpiderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed ledger line {line} in {}: {content:?}", .path.display())]
    Ledger {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Clone error: {0}")]
    Clone(String),
}

pub type Result<T> = std::result::Result<T, SpiderError>;

pub struct ErrorReporter;

impl ErrorReporter {
    pub fn report_error(err: &SpiderError) {
        let prefix = match err {
            SpiderError::Config(_) => "⚙️ ",
            SpiderError::Http(_) | SpiderError::Api { .. } => "🌐 ",
            SpiderError::Io(_) | SpiderError::Ledger { .. } => "💾 ",
            SpiderError::Json(_) | SpiderError::Csv(_) => "📝 ",
            SpiderError::Clone(_) => "🐙 ",
        };
        println!("{}", format!("{}{}", prefix, err).red().bold());
        error!("{}", err);
    }

    pub fn report_warning(message: &str) {
        println!("{}", format!("⚠️ {}", message).yellow());
        warn!("{}", message);
    }

    pub fn report_info(message: &str) {
        println!("{}", format!("ℹ️ {}", message).cyan());
        info!("{}", message);
    }

    pub fn report_success(message: &str) {
        println!("{}", format!("✅ {}", message).green().bold());
        info!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_error_names_file_and_line() {
        let err = SpiderError::Ledger {
            path: PathBuf::from("out/cloned_repo.2019.txt"),
            line: 3,
            content: "42 only-two".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("out/cloned_repo.2019.txt"));
        assert!(msg.contains("42 only-two"));
    }

    #[test]
    fn api_error_carries_status() {
        let err = SpiderError::Api { status: 422, body: "Validation Failed".into() };
        assert_eq!(err.to_string(), "GitHub API error (422): Validation Failed");
    }
}
