use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("store connection poisoned")]
    Poisoned,

    /// The caller's transform refused the update.
    #[error(transparent)]
    Transform(connect_sdk::StoreError),
}

impl From<StoreError> for connect_sdk::StoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transform(inner) => inner,
            StoreError::Poisoned => connect_sdk::StoreError::Poisoned,
            other => connect_sdk::StoreError::Backend(other.to_string()),
        }
    }
}
