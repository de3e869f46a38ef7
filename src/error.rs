//! Crate-wide error types, one enum per concern.

pub type Result<T> = std::result::Result<T, AppError>;

/// Top-level error returned by each worker's `run` loop startup path.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("rpki error: {0}")]
    Rpki(#[from] RpkiError),
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("postgres error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("malformed ris-live frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("feed closed by remote")]
    ClosedByRemote,
}

#[derive(Debug, thiserror::Error)]
pub enum RpkiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("validator returned an unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("validator did not become reachable within the startup deadline")]
    StartupProbeFailed,
}
