// MIT LICENSE
//
// Copyright (c) 2024 Copse Core Group
//
// Permission is hereby granted, free of charge, to any
// person obtaining a copy of this software and associated
// documentation files (the "Software"), to deal in the
// Software without restriction, including without
// limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software
// is furnished to do so, subject to the following
// conditions:
//
// The above copyright notice and this permission notice
// shall be included in all copies or substantial portions
// of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF
// ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED
// TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A
// PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
// SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY
// CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR
// IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! copse: a versioned, content-addressed key-value store.
//!
//! Clients submit transactions, ordered batches of
//! write/unlink/mkdir/symlink/append operations, and the engine applies
//! them to a persistent directory tree layered over a content store,
//! producing a new root blobref after every committed transaction.

mod compact;
mod dir;
mod error;
pub mod flags;
pub mod key;
mod kvs;
mod lookup;
mod ops;
mod rpc;
mod txn;
mod txn_mgr;

#[cfg(test)]
mod tests;

pub use copse_blobref::{Blobref, HashAlgo, BLOBREF_MAX_STRING_SIZE};
pub use copse_content::{Checkpoint, ContentStore, MemContentStore};
pub use copse_treeobj::Treeobj;

pub use crate::{
    dir::KvsDir,
    error::Error,
    kvs::{CommitResult, Kvs, KvsOptions, RootInfo, TxnOutcome},
    lookup::{lookup_at, LookupOutcome, LookupResult},
    ops::{Op, TxnBuilder},
    rpc::RpcFuture,
    txn::{Process, Txn},
    txn_mgr::TxnMgr,
};

/// The distinguished namespace. Sync commits are only legal here.
pub const PRIMARY_NAMESPACE: &str = "primary";

/// Limit of symlink indirections during a walk
pub(crate) const MAX_SYMLINK_HOPS: usize = 10;
