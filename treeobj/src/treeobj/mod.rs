//! The tree-object record itself. Construction, accessors and mutators are
//! kept in their own modules so this one stays about the shape of the data.

mod constructor;
pub(crate) mod helpers;
mod serialize;

use std::{collections::BTreeMap, fmt};

use copse_blobref::Blobref;

/// Wire format version. There has only ever been one.
pub const TREEOBJ_VERSION: u32 = 1;

/// Variants of a stored tree node.
///
/// `Clone` is a full recursive copy. The reference-counted sharing the
/// protocol was designed around does not exist here; call sites that only
/// need a one-level copy simply pay for the deep one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Treeobj {
    /// Small value held inline, raw bytes (base64 on the wire)
    Val(Vec<u8>),
    /// Large value: the ordered concatenation of referenced blobs
    Valref(Vec<Blobref>),
    /// Inline directory
    Dir(BTreeMap<String, Treeobj>),
    /// Directory stored out-of-line; holds exactly one blobref to a
    /// serialized `dir` blob
    Dirref(Vec<Blobref>),
    /// Symbolic link, optionally into another namespace
    Symlink {
        namespace: Option<String>,
        target: String,
    },
}

impl Treeobj {
    pub fn type_str(&self) -> &'static str {
        match self {
            Treeobj::Val(_) => "val",
            Treeobj::Valref(_) => "valref",
            Treeobj::Dir(_) => "dir",
            Treeobj::Dirref(_) => "dirref",
            Treeobj::Symlink { .. } => "symlink",
        }
    }
}

impl fmt::Display for Treeobj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Treeobj::Val(data) => write!(f, "val({} bytes)", data.len()),
            Treeobj::Valref(refs) => write!(f, "valref({} blobrefs)", refs.len()),
            Treeobj::Dir(entries) => write!(f, "dir({} entries)", entries.len()),
            Treeobj::Dirref(refs) => match refs.first() {
                Some(r) => write!(f, "dirref({})", r),
                None => write!(f, "dirref(empty)"),
            },
            Treeobj::Symlink { namespace, target } => match namespace {
                Some(ns) => write!(f, "symlink({}::{})", ns, target),
                None => write!(f, "symlink({})", target),
            },
        }
    }
}
