#[derive(Debug, Clone, thiserror::Error)]
pub enum ContentError {
    /// Backend refused the blob for lack of room
    #[error("no space left in content store")]
    NoSpace,

    /// Checkpoint would roll a namespace back to an older sequence
    #[error("checkpoint sequence {proposed} is older than {current}")]
    StaleCheckpoint { current: u64, proposed: u64 },

    /// Backend returned data that does not match its blobref
    #[error("content corruption: {0}")]
    Corruption(String),

    /// Backend-specific failure
    #[error("content store error: {0}")]
    Backend(String),
}
