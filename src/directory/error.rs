use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Identity authority request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identity authority rejected request: {0}")]
    Rejected(String),

    #[error("Identity authority returned no data")]
    MissingData,
}
