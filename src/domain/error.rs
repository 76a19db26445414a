use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    Config(String),
    AuthFailure(String),
    NavigationTimeout(String),
    DownloadTimeout(String),
    AmbiguousDownload(String),
    Session(String),
    Parse(String),
    Transfer(String),
    Delivery(String),
    Io(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::AuthFailure(msg) => write!(f, "Authentication failure: {}", msg),
            AppError::NavigationTimeout(msg) => write!(f, "Navigation timeout: {}", msg),
            AppError::DownloadTimeout(msg) => write!(f, "Download timeout: {}", msg),
            AppError::AmbiguousDownload(msg) => write!(f, "Ambiguous download: {}", msg),
            AppError::Session(msg) => write!(f, "Session error: {}", msg),
            AppError::Parse(msg) => write!(f, "Parse error: {}", msg),
            AppError::Transfer(msg) => write!(f, "Transfer error: {}", msg),
            AppError::Delivery(msg) => write!(f, "Delivery error: {}", msg),
            AppError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
