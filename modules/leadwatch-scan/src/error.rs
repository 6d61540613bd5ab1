use leadwatch_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Invalid scan configuration: {0}")]
    Config(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
