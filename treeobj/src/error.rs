use copse_blobref::BlobrefError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TreeobjError {
    /// Caller handed us something that cannot be a tree object
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Buffer failed to parse or failed schema validation
    #[error("bad encoding: {0}")]
    BadEncoding(&'static str),

    /// Operation applied to the wrong record type
    #[error("wrong treeobj type: {0}")]
    WrongType(&'static str),

    /// Directory has no entry under that name
    #[error("no entry: {0}")]
    NoEntry(String),

    #[error(transparent)]
    Blobref(#[from] BlobrefError),
}
