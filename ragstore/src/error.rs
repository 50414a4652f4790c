use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding endpoint returned {status}: {body}")]
    EmbeddingStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid embedding response: {0}")]
    Embedding(String),
    #[error("failed to start store runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
