use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid document key: {0:?}")]
    InvalidKey(String),

    #[error("document {key} is not valid JSON: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}
