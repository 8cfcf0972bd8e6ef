use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid glob pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
    #[error("glob match error: {0}")]
    Glob(#[from] glob::GlobError),
}
