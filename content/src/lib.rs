//! Content store abstraction.
//!
//! The store is a map from blobref to blob with durability hooks: `flush`
//! persists everything stored so far, and checkpoints record which root a
//! namespace points at. The commit pipeline drives it exclusively through
//! [`ContentStore`], so backends are interchangeable; the in-memory backend
//! here is what the test suites and single-node deployments run on.

mod error;
mod memory;

use copse_blobref::Blobref;
use serde::{Deserialize, Serialize};

pub use crate::{error::ContentError, memory::MemContentStore};

/// Durable record of where a namespace root pointed at a given sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub rootref: Blobref,
    pub seq: u64,
}

pub trait ContentStore {
    /// Store a blob, returning its blobref. Idempotent: storing the same
    /// bytes twice is not an error and yields the same blobref.
    fn store(&mut self, data: &[u8]) -> Result<Blobref, ContentError>;

    /// Raw bytes previously stored under `blobref`, or `None`.
    fn load(&self, blobref: &Blobref) -> Result<Option<Vec<u8>>, ContentError>;

    /// Return only after every blob stored so far is durable.
    fn flush(&mut self) -> Result<(), ContentError>;

    /// Record that namespace `name` now points at `rootref` with `seq`.
    /// Must refuse to overwrite a checkpoint with a newer sequence.
    fn checkpoint_commit(
        &mut self,
        name: &str,
        rootref: &Blobref,
        seq: u64,
    ) -> Result<(), ContentError>;

    fn checkpoint_get(&self, name: &str) -> Option<Checkpoint>;
}
