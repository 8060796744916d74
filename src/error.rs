use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("this endpoint supports asset pairs but only one asset supplied")]
    MissingPairedFilter,
    #[error("no asset registered for {0}")]
    AssetNotFound(String),
    #[error("invalid paging cursor: {0}")]
    InvalidCursor(String),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}
