use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The caller sent a filter that cannot be turned into a query.
    #[error("{0}")]
    Validation(String),

    /// There is not a single question in the store, filtered or not.
    #[error("no questions are available")]
    EmptyStore,

    #[error("test {0} not found")]
    NotFound(i64),

    /// The store is missing a base table; the service must not start.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Message safe to hand back to an HTTP caller.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::NotFound(_) => "Test not found".to_string(),
            Error::EmptyStore => "No questions are available".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}
