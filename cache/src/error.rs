use copse_treeobj::TreeobjError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Insert of a blobref that is already cached
    #[error("entry already present: {0}")]
    Exists(String),

    /// Entry has no data yet
    #[error("entry has no data")]
    NotValid,

    /// Removal refused: the entry still has to be flushed
    #[error("entry is dirty")]
    Dirty,

    /// Removal refused: an external holder still references the entry
    #[error("entry is referenced")]
    Busy,

    /// Dirty-bit transition that the entry life cycle does not allow
    #[error("illegal dirty transition")]
    InvalidTransition,

    /// Data under a blobref changed, which must never happen
    #[error("cache corruption: {0}")]
    Corruption(String),

    #[error(transparent)]
    Treeobj(#[from] TreeobjError),
}
