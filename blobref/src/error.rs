#[derive(Debug, Clone, thiserror::Error)]
pub enum BlobrefError {
    /// Hash algorithm token is not one we know how to compute
    #[error("unknown hash algorithm: {0}")]
    UnknownHash(String),

    /// String does not have the `<algo>-<hex>` shape
    #[error("malformed blobref: {0}")]
    Malformed(&'static str),
}
