use copse_blobref::Blobref;
use copse_cache::CacheError;
use copse_content::ContentError;
use copse_treeobj::TreeobjError;

/// Engine-level error. `Clone` so a transaction can both retain the error
/// for later inspection and report it to every name in a merged group.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // Input data errors
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("bad encoding: {0}")]
    BadEncoding(&'static str),

    // Tree shape errors
    #[error("is a directory: {0}")]
    IsDirectory(&'static str),
    #[error("not a directory: {0}")]
    NotDirectory(&'static str),
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    #[error("symlink hops limit exceeded")]
    SymlinkLimit,

    // Lookup errors
    #[error("no entry: {0}")]
    NoEntry(String),
    #[error("blob not found in content store: {0}")]
    MissingBlob(Blobref),

    // Content store errors
    #[error("no space left in content store")]
    NoSpace,
    #[error("checkpoint sequence {proposed} is older than {current}")]
    StaleCheckpoint { current: u64, proposed: u64 },

    // Irrecoverable errors: an internal invariant was violated
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl From<TreeobjError> for Error {
    fn from(e: TreeobjError) -> Self {
        match e {
            TreeobjError::InvalidInput(s) => Error::InvalidInput(s),
            TreeobjError::BadEncoding(s) => Error::BadEncoding(s),
            TreeobjError::WrongType(s) => Error::NotDirectory(s),
            TreeobjError::NoEntry(key) => Error::NoEntry(key),
            TreeobjError::Blobref(_) => Error::InvalidInput("bad blobref"),
        }
    }
}

impl From<CacheError> for Error {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Treeobj(inner) => inner.into(),
            // any other cache failure means the pipeline broke its own
            // bookkeeping contract
            other => Error::Unrecoverable(other.to_string()),
        }
    }
}

impl From<ContentError> for Error {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::NoSpace => Error::NoSpace,
            ContentError::StaleCheckpoint { current, proposed } => {
                Error::StaleCheckpoint { current, proposed }
            }
            other => Error::Unrecoverable(other.to_string()),
        }
    }
}
