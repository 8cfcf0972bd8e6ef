use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid glob pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
    #[error("glob match error: {0}")]
    Glob(#[from] glob::GlobError),
    #[error("failed to serialize snapshot `{path}`: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to deserialize snapshot `{path}`: {source}")]
    Deserialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot filename `{name}` does not match `<protocol>_<date>.<host>.json.gz`")]
    BadFilename { name: String },
}
