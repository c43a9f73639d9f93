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

//! The store engine: one namespace, one root, one commit pipeline.
//!
//! [`Kvs`] ties the pieces together. It owns the live `(rootref, rootseq)`
//! pair, the blob cache, the ready queue, and the content store, and it is
//! the caller that every [`Txn`] stall code is aimed at: missing blobs are
//! loaded here, dirty blobs are stored here, and the sync futures are
//! fulfilled here against the content store.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use copse_blobref::{Blobref, HashAlgo};
use copse_cache::{Cache, CacheEntry};
use copse_content::ContentStore;
use copse_treeobj::Treeobj;

use crate::{
    dir::KvsDir,
    error::Error,
    lookup::{lookup_at, LookupOutcome, LookupResult},
    ops::Op,
    txn::{Process, Txn},
    txn_mgr::TxnMgr,
    PRIMARY_NAMESPACE,
};

#[derive(Debug, Clone)]
pub struct KvsOptions {
    pub namespace: String,
    pub algo: HashAlgo,
}

impl Default for KvsOptions {
    fn default() -> Self {
        KvsOptions {
            namespace: PRIMARY_NAMESPACE.to_string(),
            algo: HashAlgo::Sha1,
        }
    }
}

/// Outcome of a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResult {
    pub rootref: Blobref,
    pub rootseq: u64,
    /// Normalized keys the transaction touched, in op order
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootInfo {
    pub rootref: Blobref,
    pub rootseq: u64,
    pub namespace: String,
}

struct FencePending {
    nprocs: u32,
    count: u32,
    flags: u32,
    ops: Vec<Op>,
}

/// Per-transaction result of a [`Kvs::run`] pass. A merged transaction
/// reports one outcome carrying every member's name.
#[derive(Debug)]
pub struct TxnOutcome {
    pub names: Vec<String>,
    pub result: Result<CommitResult, Error>,
}

enum DriveEnd {
    Committed {
        newroot: Blobref,
        keys: Vec<String>,
        names: Vec<String>,
    },
    Failed {
        err: Error,
        names: Vec<String>,
        fallback: bool,
    },
}

pub struct Kvs<S: ContentStore> {
    store: S,
    cache: Rc<RefCell<Cache>>,
    mgr: TxnMgr,
    namespace: String,
    rootref: Blobref,
    rootseq: u64,
    fences: HashMap<String, FencePending>,
}

impl<S: ContentStore> Kvs<S> {
    /// Open the namespace: adopt the store's checkpoint when one exists,
    /// otherwise bootstrap an empty root directory at sequence zero.
    pub fn open(mut store: S, options: KvsOptions) -> Result<Self, Error> {
        let (rootref, rootseq) = match store.checkpoint_get(&options.namespace) {
            Some(checkpoint) => (checkpoint.rootref, checkpoint.seq),
            None => {
                let empty = Treeobj::dir().encode()?;
                let rootref = store.store(empty.as_bytes())?;
                store.checkpoint_commit(&options.namespace, &rootref, 0)?;
                (rootref, 0)
            }
        };
        let cache = Rc::new(RefCell::new(Cache::new()));
        let mgr = TxnMgr::new(Rc::clone(&cache), &options.namespace, options.algo);
        Ok(Kvs {
            store,
            cache,
            mgr,
            namespace: options.namespace,
            rootref,
            rootseq,
            fences: HashMap::new(),
        })
    }

    pub fn getroot(&self) -> RootInfo {
        RootInfo {
            rootref: self.rootref.clone(),
            rootseq: self.rootseq,
            namespace: self.namespace.clone(),
        }
    }

    /// Apply a named transaction and return the new root.
    pub fn commit(
        &mut self,
        name: &str,
        ops: Vec<Op>,
        txn_flags: u32,
    ) -> Result<CommitResult, Error> {
        self.enqueue(name, ops, txn_flags)?;
        let outcomes = self.run();
        take_outcome(outcomes, name)
    }

    /// Queue a transaction without driving the pipeline. Queued
    /// transactions commit on the next [`Kvs::run`] (or [`Kvs::commit`]),
    /// in submission order; adjacent compatible ones are merged.
    pub fn enqueue(&mut self, name: &str, ops: Vec<Op>, txn_flags: u32) -> Result<(), Error> {
        self.mgr.add(name, ops, txn_flags, 0)
    }

    /// Drive every queued transaction to completion and report one
    /// outcome per commit attempt.
    pub fn run(&mut self) -> Vec<TxnOutcome> {
        self.run_ready()
    }

    /// Collective commit: ops accumulate under `name` until `nprocs`
    /// participants have submitted, then one merged transaction commits.
    /// Returns `None` while the fence is still filling.
    pub fn fence(
        &mut self,
        name: &str,
        nprocs: u32,
        ops: Vec<Op>,
        txn_flags: u32,
    ) -> Result<Option<CommitResult>, Error> {
        if nprocs == 0 {
            return Err(Error::InvalidInput("fence requires at least one process"));
        }
        let pending = self
            .fences
            .entry(name.to_string())
            .or_insert_with(|| FencePending {
                nprocs,
                count: 0,
                flags: txn_flags,
                ops: Vec::new(),
            });
        if pending.nprocs != nprocs || pending.flags != txn_flags {
            return Err(Error::InvalidInput(
                "fence parameters differ between participants",
            ));
        }
        pending.count += 1;
        pending.ops.extend(ops);
        if pending.count < pending.nprocs {
            return Ok(None);
        }
        match self.fences.remove(name) {
            None => Err(Error::Unrecoverable("fence table lost an entry".to_string())),
            Some(pending) => {
                self.mgr.add(name, pending.ops, pending.flags, 0)?;
                let outcomes = self.run_ready();
                take_outcome(outcomes, name).map(Some)
            }
        }
    }

    /// Look `key` up under the live root.
    pub fn lookup(&mut self, key: &str, lookup_flags: u32) -> Result<LookupResult, Error> {
        let root = self.root_treeobj()?;
        self.lookup_under(&root, key, lookup_flags)
    }

    /// Look `key` up under a caller-provided snapshot root.
    pub fn lookupat(
        &mut self,
        root: &Treeobj,
        key: &str,
        lookup_flags: u32,
    ) -> Result<LookupResult, Error> {
        self.lookup_under(root, key, lookup_flags)
    }

    /// Directory snapshot under `key`, for iterating entries and deriving
    /// their full keys.
    pub fn lookup_dir(&mut self, key: &str) -> Result<KvsDir, Error> {
        match self.lookup(key, crate::flags::LOOKUP_READDIR)? {
            LookupResult::Directory(dirobj) => KvsDir::new(key, dirobj),
            _ => Err(Error::NotDirectory("key does not name a directory")),
        }
    }

    /// The raw bytes stored under `key`.
    pub fn get(&mut self, key: &str) -> Result<Vec<u8>, Error> {
        match self.lookup(key, 0)? {
            LookupResult::Value(data) => Ok(data),
            _ => Err(Error::Unrecoverable("plain lookup returned a non-value".to_string())),
        }
    }

    /// Stores that found their blob already cached.
    pub fn noop_stores(&self) -> u64 {
        self.mgr.noop_stores()
    }

    pub fn clear_noop_stores(&self) {
        self.mgr.clear_noop_stores()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Evict cache entries nothing refers to anymore.
    pub fn drop_cache(&mut self) -> usize {
        self.cache.borrow_mut().drop_clean_unreferenced()
    }

    pub fn content_store(&self) -> &S {
        &self.store
    }

    pub fn content_store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Tear the engine down, handing the content store back.
    pub fn into_content_store(self) -> S {
        self.store
    }

    /// Drive every ready transaction to completion, in FIFO order.
    fn run_ready(&mut self) -> Vec<TxnOutcome> {
        let mut outcomes = Vec::new();
        loop {
            if self.mgr.merge_ready().is_err() {
                break;
            }
            let rootref = self.rootref.clone();
            let rootseq = self.rootseq;
            let cache = Rc::clone(&self.cache);
            let store = &mut self.store;
            let namespace = self.namespace.clone();
            let driven = match self.mgr.get_ready() {
                None => break,
                Some(txn) => drive_txn(txn, store, &cache, &namespace, &rootref, rootseq),
            };
            match driven {
                DriveEnd::Committed {
                    newroot,
                    keys,
                    names,
                } => {
                    // this commit's root is what the next queued
                    // transaction builds on
                    self.rootref = newroot.clone();
                    self.rootseq = rootseq + 1;
                    self.mgr.remove_ready(false);
                    outcomes.push(TxnOutcome {
                        names,
                        result: Ok(CommitResult {
                            rootref: newroot,
                            rootseq: self.rootseq,
                            keys,
                        }),
                    });
                }
                DriveEnd::Failed {
                    err,
                    names,
                    fallback,
                } => {
                    if fallback {
                        // merged commit failed: resurface the members and
                        // commit them one at a time
                        self.mgr.remove_ready(true);
                    } else {
                        self.mgr.remove_ready(false);
                        outcomes.push(TxnOutcome {
                            names,
                            result: Err(err),
                        });
                    }
                }
            }
        }
        outcomes
    }

    fn lookup_under(
        &mut self,
        root: &Treeobj,
        key: &str,
        lookup_flags: u32,
    ) -> Result<LookupResult, Error> {
        loop {
            match lookup_at(&self.cache, &self.namespace, root, key, lookup_flags)? {
                LookupOutcome::Done(result) => return Ok(result),
                LookupOutcome::Missing(refs) => {
                    for blobref in refs {
                        load_into_cache(&mut self.store, &self.cache, &blobref)?;
                    }
                }
            }
        }
    }

    /// Shared view of the live root directory, loading its blob on first
    /// use.
    fn root_treeobj(&mut self) -> Result<Rc<Treeobj>, Error> {
        let rootref = self.rootref.clone();
        let entry = self.cache.borrow().lookup(&rootref);
        let entry = match entry {
            Some(entry) if entry.is_valid() => entry,
            _ => load_into_cache(&mut self.store, &self.cache, &rootref)?,
        };
        Ok(entry.treeobj()?)
    }
}

/// Advance one transaction until it finishes or fails, satisfying every
/// stall from the content store.
fn drive_txn<S: ContentStore>(
    txn: &mut Txn,
    store: &mut S,
    cache: &Rc<RefCell<Cache>>,
    namespace: &str,
    rootref: &Blobref,
    rootseq: u64,
) -> DriveEnd {
    loop {
        match txn.process(rootref, rootseq) {
            Process::LoadMissingRefs => {
                let loaded = txn.with_missing_refs(|blobref| {
                    load_into_cache(store, cache, blobref).map(|_| ())
                });
                if let Err(err) = loaded {
                    txn.set_aux_error(err.clone());
                    return DriveEnd::Failed {
                        err,
                        names: txn.names().to_vec(),
                        fallback: txn.fallback_mergeable(),
                    };
                }
            }
            Process::DirtyCacheEntries => {
                let stored = txn.with_dirty_entries(|entry| {
                    {
                        let data = entry.raw()?;
                        store.store(&data)?;
                    }
                    entry.set_dirty(false)?;
                    Ok(())
                });
                if let Err(err) = stored {
                    txn.set_aux_error(err.clone());
                    return DriveEnd::Failed {
                        err,
                        names: txn.names().to_vec(),
                        fallback: txn.fallback_mergeable(),
                    };
                }
            }
            Process::SyncContentFlush => match txn.sync_content_flush() {
                Ok(future) => future.fulfill(store.flush().map_err(Error::from)),
                Err(err) => {
                    return DriveEnd::Failed {
                        err,
                        names: txn.names().to_vec(),
                        fallback: false,
                    }
                }
            },
            Process::SyncCheckpoint => match txn.sync_checkpoint() {
                Ok((future, newroot, seq)) => future.fulfill(
                    store
                        .checkpoint_commit(namespace, &newroot, seq)
                        .map_err(Error::from),
                ),
                Err(err) => {
                    return DriveEnd::Failed {
                        err,
                        names: txn.names().to_vec(),
                        fallback: false,
                    }
                }
            },
            Process::Finished => {
                let keys = txn
                    .keys()
                    .map(|keys| keys.iter().cloned().collect())
                    .unwrap_or_default();
                return match txn.newroot_ref() {
                    Some(newroot) => DriveEnd::Committed {
                        newroot: newroot.clone(),
                        keys,
                        names: txn.names().to_vec(),
                    },
                    None => DriveEnd::Failed {
                        err: Error::Unrecoverable(
                            "transaction finished without a root".to_string(),
                        ),
                        names: txn.names().to_vec(),
                        fallback: false,
                    },
                };
            }
            Process::Error => {
                let err = txn.error().cloned().unwrap_or_else(|| {
                    Error::Unrecoverable("transaction failed without an error".to_string())
                });
                return DriveEnd::Failed {
                    err,
                    names: txn.names().to_vec(),
                    fallback: txn.fallback_mergeable(),
                };
            }
        }
    }
}

/// Load a blob from the content store into the cache, waking whoever is
/// waiting on it.
fn load_into_cache<S: ContentStore>(
    store: &mut S,
    cache: &Rc<RefCell<Cache>>,
    blobref: &Blobref,
) -> Result<Rc<CacheEntry>, Error> {
    let data = store
        .load(blobref)?
        .ok_or_else(|| Error::MissingBlob(blobref.clone()))?;
    let entry = {
        let mut cache = cache.borrow_mut();
        match cache.lookup(blobref) {
            Some(entry) => entry,
            None => {
                let entry = CacheEntry::new(blobref.clone());
                cache.insert(Rc::clone(&entry))?;
                entry
            }
        }
    };
    entry.set_raw(&data)?;
    Ok(entry)
}

fn take_outcome(outcomes: Vec<TxnOutcome>, name: &str) -> Result<CommitResult, Error> {
    for outcome in outcomes {
        if outcome.names.iter().any(|n| n == name) {
            return outcome.result;
        }
    }
    Err(Error::Unrecoverable(format!(
        "no commit outcome recorded for '{}'",
        name
    )))
}
