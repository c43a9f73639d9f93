//! Constructor
//! Functions for creating tree objects of each type

use std::collections::BTreeMap;

use copse_blobref::{Blobref, HashAlgo};

use crate::{error::TreeobjError, treeobj::Treeobj};

impl Treeobj {
    /// Create an empty directory
    pub fn dir() -> Self {
        Treeobj::Dir(BTreeMap::new())
    }

    /// Create an inline value holding `data`
    pub fn val(data: impl Into<Vec<u8>>) -> Self {
        Treeobj::Val(data.into())
    }

    /// Create a valref over a single blobref
    pub fn valref(blobref: Blobref) -> Self {
        Treeobj::Valref(vec![blobref])
    }

    /// Create a dirref pointing at a stored `dir` blob
    pub fn dirref(blobref: Blobref) -> Self {
        Treeobj::Dirref(vec![blobref])
    }

    /// Create a symlink to `target`, optionally in another namespace
    pub fn symlink(
        namespace: Option<&str>,
        target: &str,
    ) -> Result<Self, TreeobjError> {
        if target.is_empty() {
            return Err(TreeobjError::InvalidInput("symlink target is empty"));
        }
        if namespace.is_some_and(str::is_empty) {
            return Err(TreeobjError::InvalidInput("symlink namespace is empty"));
        }
        Ok(Treeobj::Symlink {
            namespace: namespace.map(str::to_string),
            target: target.to_string(),
        })
    }

    /// Split `data` into pieces no larger than `maxblob` (the whole buffer
    /// when `maxblob` is zero), hash each piece, and build a valref whose
    /// blobrefs are in concatenation order. The blobs themselves are not
    /// stored; the caller owns that. Zero-length input still yields a
    /// single-element valref of the empty blob.
    pub fn valref_buf(algo: HashAlgo, maxblob: usize, data: &[u8]) -> Self {
        let mut refs = Vec::new();
        let mut rest = data;
        loop {
            let take = if maxblob > 0 && rest.len() > maxblob {
                maxblob
            } else {
                rest.len()
            };
            let (piece, tail) = rest.split_at(take);
            refs.push(Blobref::hash(algo, piece));
            rest = tail;
            if rest.is_empty() {
                break;
            }
        }
        Treeobj::Valref(refs)
    }
}
