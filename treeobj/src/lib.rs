//! Tree-object records.
//!
//! A tree object (treeobj) is one node of the copse directory tree: a
//! self-describing, versioned record of type `val`, `valref`, `dir`,
//! `dirref` or `symlink`. Directories may hold other tree objects inline
//! or point at them through the content store, which makes the whole tree
//! a Merkle-like structure over blobrefs.
//!
//! The wire form is canonical JSON (`{"data":...,"type":...,"ver":1}`,
//! compact, keys sorted) so a given tree always encodes to the same bytes
//! and therefore the same blobref.

mod error;
mod treeobj;

pub use crate::{
    error::TreeobjError,
    treeobj::{Treeobj, TREEOBJ_VERSION},
};
