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

//! The per-transaction commit state machine.
//!
//! A transaction walks a working copy of the root directory, applies its
//! operations, serializes every directory it touched into the cache as
//! dirty blobs, and ends up with a new root blobref. It cannot do I/O
//! itself: whenever it needs a blob that is not resident, or has produced
//! blobs the content store has not acknowledged, [`Txn::process`] returns
//! a stall code and the caller satisfies the dependency before calling
//! `process` again.

use std::{
    cell::{Cell, RefCell},
    collections::{btree_map::Entry as MapEntry, BTreeMap, VecDeque},
    rc::Rc,
};

use copse_blobref::{Blobref, HashAlgo, BLOBREF_MAX_STRING_SIZE};
use copse_cache::{Cache, CacheEntry};
use copse_treeobj::Treeobj;
use indexmap::IndexSet;

use crate::{
    error::Error,
    flags::{COMMIT_NO_MERGE, COMMIT_SYNC, INTERNAL_NO_PUBLISH, OP_APPEND},
    key,
    ops::Op,
    rpc::RpcFuture,
    MAX_SYMLINK_HOPS, PRIMARY_NAMESPACE,
};

/// What `process` wants from the caller next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Process {
    /// Terminal: `newroot_ref` and `keys` are observable
    Finished,
    /// Terminal: see [`Txn::error`]
    Error,
    /// Drain [`Txn::with_missing_refs`], load each blob, call again
    LoadMissingRefs,
    /// Drain [`Txn::with_dirty_entries`], store each blob, call again
    DirtyCacheEntries,
    /// Fulfill the future from [`Txn::sync_content_flush`], call again
    SyncContentFlush,
    /// Fulfill the future from [`Txn::sync_checkpoint`], call again
    SyncCheckpoint,
}

/* State transitions
 *
 * INIT - initial checks
 * LOAD_ROOT - load root dir
 *           - if needed, report missing refs to caller and stall
 * APPLY_OPS - apply operations to the working copy
 *           - if needed, report missing refs to caller and stall
 * STORE - serialize changed dirs into dirty cache entries
 * GENERATE_KEYS - stall until stores complete
 *               - generate the set of keys modified by the txn
 * SYNC_CONTENT_FLUSH - await content flush (COMMIT_SYNC)
 * SYNC_CHECKPOINT - await checkpoint commit (COMMIT_SYNC)
 * FINISHED - end state
 *
 * INIT -> LOAD_ROOT
 * LOAD_ROOT -> APPLY_OPS
 * LOAD_ROOT -> GENERATE_KEYS (if no ops)
 * APPLY_OPS -> STORE
 * STORE -> GENERATE_KEYS
 * GENERATE_KEYS -> FINISHED
 * GENERATE_KEYS -> SYNC_CONTENT_FLUSH
 * SYNC_CONTENT_FLUSH -> SYNC_CHECKPOINT
 * SYNC_CHECKPOINT -> FINISHED
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum State {
    Init,
    LoadRoot,
    ApplyOps,
    Store,
    GenerateKeys,
    SyncContentFlush,
    SyncCheckpoint,
    Finished,
}

enum Walk {
    Done,
    Missing(Blobref),
    FollowLink(String),
}

pub struct Txn {
    err: Option<Error>,
    aux_err: Option<Error>,
    pub(crate) ops: Vec<Op>,
    keys: Option<IndexSet<String>>,
    pub(crate) names: Vec<String>,
    pub(crate) flags: u32,
    pub(crate) internal_flags: u32,
    /// Working copy of the root dir
    rootcpy: Option<Treeobj>,
    /// Source of rootcpy above, shared with the cache entry
    rootdir: Option<Rc<Treeobj>>,
    /// Pins the cache entry backing rootdir
    root_entry: Option<Rc<CacheEntry>>,
    /// Pins the new root until the caller swings the live root pointer
    newroot_entry: Option<Rc<CacheEntry>>,
    newroot: Option<Blobref>,
    missing_refs: Vec<Blobref>,
    dirty_cache_entries: VecDeque<Rc<CacheEntry>>,
    f_sync_content_flush: Option<RpcFuture<()>>,
    f_sync_checkpoint: Option<RpcFuture<()>>,
    checkpoint_seq: Option<u64>,
    pub(crate) processing: bool,
    pub(crate) merged: bool,
    pub(crate) merge_component: bool,
    pub(crate) state: State,
    cache: Rc<RefCell<Cache>>,
    namespace: Rc<str>,
    algo: HashAlgo,
    noop_stores: Rc<Cell<u64>>,
}

impl Txn {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cache: Rc<RefCell<Cache>>,
        namespace: Rc<str>,
        algo: HashAlgo,
        noop_stores: Rc<Cell<u64>>,
        name: Option<&str>,
        ops: Vec<Op>,
        flags: u32,
        internal_flags: u32,
    ) -> Txn {
        Txn {
            err: None,
            aux_err: None,
            ops,
            keys: None,
            names: name.map(str::to_string).into_iter().collect(),
            flags,
            internal_flags,
            rootcpy: None,
            rootdir: None,
            root_entry: None,
            newroot_entry: None,
            newroot: None,
            missing_refs: Vec::new(),
            dirty_cache_entries: VecDeque::new(),
            f_sync_content_flush: None,
            f_sync_checkpoint: None,
            checkpoint_seq: None,
            processing: false,
            merged: false,
            merge_component: false,
            state: State::Init,
            cache,
            namespace,
            algo,
            noop_stores,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    pub fn aux_error(&self) -> Option<&Error> {
        self.aux_err.as_ref()
    }

    /// Record a failure that happened outside `process`, e.g. while the
    /// caller was loading or storing blobs on this transaction's behalf.
    pub fn set_aux_error(&mut self, err: Error) {
        self.aux_err = Some(err);
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn internal_flags(&self) -> u32 {
        self.internal_flags
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// A failed merged transaction can be re-surfaced as its components
    pub fn fallback_mergeable(&self) -> bool {
        self.merged
    }

    /// The new root blobref, observable once FINISHED
    pub fn newroot_ref(&self) -> Option<&Blobref> {
        if self.state == State::Finished {
            self.newroot.as_ref()
        } else {
            None
        }
    }

    /// Normalized keys touched by this transaction, observable once
    /// FINISHED
    pub fn keys(&self) -> Option<&IndexSet<String>> {
        if self.state == State::Finished {
            self.keys.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn no_merge(&self) -> bool {
        // COMMIT_SYNC implies NO_MERGE: the checkpoint must cover exactly
        // this commit
        self.flags & (COMMIT_NO_MERGE | COMMIT_SYNC) != 0
    }

    /// A blocked transaction is waiting on its caller: missing refs not
    /// yet drained, dirty entries not yet stored, or a sync future not
    /// yet fulfilled.
    pub(crate) fn is_blocked(&self) -> bool {
        match self.state {
            State::LoadRoot | State::ApplyOps => !self.missing_refs.is_empty(),
            State::GenerateKeys => !self.dirty_cache_entries.is_empty(),
            State::SyncContentFlush => self
                .f_sync_content_flush
                .as_ref()
                .is_some_and(|future| !future.is_ready()),
            State::SyncCheckpoint => self
                .f_sync_checkpoint
                .as_ref()
                .is_some_and(|future| !future.is_ready()),
            _ => false,
        }
    }

    /// Advance the state machine. Re-entrant: after a stall, satisfy the
    /// dependency and call again with the same root.
    pub fn process(&mut self, root_ref: &Blobref, root_seq: u64) -> Process {
        if self.err.is_some() {
            return Process::Error;
        }
        if !self.processing {
            return self.fail(Error::InvalidInput("transaction is not being processed"));
        }

        loop {
            match self.state {
                State::Init => {
                    if self.flags & COMMIT_SYNC != 0
                        && self.namespace.as_ref() != PRIMARY_NAMESPACE
                    {
                        return self.fail(Error::InvalidInput(
                            "sync commit outside the primary namespace",
                        ));
                    }
                    self.state = State::LoadRoot;
                }
                State::LoadRoot => {
                    // caller did not drain the previous stall
                    if !self.missing_refs.is_empty() {
                        return Process::LoadMissingRefs;
                    }

                    let entry = self.cache.borrow().lookup(root_ref);
                    let entry = match entry {
                        Some(entry) if entry.is_valid() => entry,
                        _ => {
                            self.missing_refs.push(root_ref.clone());
                            return Process::LoadMissingRefs;
                        }
                    };

                    if self.ops.is_empty() {
                        // nothing to apply, the root does not change
                        self.newroot = Some(root_ref.clone());
                        self.state = State::GenerateKeys;
                    } else {
                        let rootdir = match entry.treeobj() {
                            Ok(obj) => obj,
                            Err(_) => {
                                return self.fail(Error::Unrecoverable(
                                    "root blob is not a tree object".to_string(),
                                ))
                            }
                        };
                        entry.incref();
                        self.root_entry = Some(entry);
                        self.rootcpy = Some((*rootdir).clone());
                        self.rootdir = Some(rootdir);
                        self.state = State::ApplyOps;
                    }
                }
                State::ApplyOps => {
                    // caller did not drain the previous stall
                    if !self.missing_refs.is_empty() {
                        return Process::LoadMissingRefs;
                    }

                    let mut rootcpy = match self.rootcpy.take() {
                        Some(rootcpy) => rootcpy,
                        None => {
                            return self.fail(Error::Unrecoverable(
                                "working root copy vanished".to_string(),
                            ))
                        }
                    };

                    // Walking key paths also materializes dirref objects
                    // into dir objects in the copy, so the transaction is
                    // self-contained in rootcpy until it is unrolled.
                    //
                    // All ops run even when one stalls, so a single pass
                    // collects every missing reference. The same blobref
                    // may be recorded more than once.
                    let mut append = false;
                    let mut result = Ok(());
                    let ops = std::mem::take(&mut self.ops);
                    for op in &ops {
                        match self.link_dirent(
                            &mut rootcpy,
                            &op.key,
                            op.dirent.as_ref(),
                            op.flags,
                            &mut append,
                        ) {
                            Ok(None) => {}
                            Ok(Some(missing)) => self.missing_refs.push(missing),
                            Err(err) => {
                                result = Err(err);
                                break;
                            }
                        }
                    }
                    self.ops = ops;

                    if let Err(err) = result {
                        self.missing_refs.clear();
                        return self.fail(err);
                    }

                    if !self.missing_refs.is_empty() {
                        // Replaying ops over a working copy that already
                        // took an append would append twice. Start the
                        // replay from a fresh copy.
                        if append {
                            rootcpy = match &self.rootdir {
                                Some(rootdir) => (**rootdir).clone(),
                                None => {
                                    return self.fail(Error::Unrecoverable(
                                        "source root dir vanished".to_string(),
                                    ))
                                }
                            };
                        }
                        self.rootcpy = Some(rootcpy);
                        return Process::LoadMissingRefs;
                    }

                    self.rootcpy = Some(rootcpy);
                    self.state = State::Store;
                }
                State::Store => {
                    let mut rootcpy = match self.rootcpy.take() {
                        Some(rootcpy) => rootcpy,
                        None => {
                            return self.fail(Error::Unrecoverable(
                                "working root copy vanished".to_string(),
                            ))
                        }
                    };

                    let stored = self
                        .unroll(&mut rootcpy)
                        .and_then(|()| self.store_treeobj(&rootcpy));
                    match stored {
                        Err(err) => {
                            self.cleanup_dirty_cache_list();
                            return self.fail(err);
                        }
                        Ok(entry) => {
                            // The entry could expire between the dirty
                            // drain and the caller picking up the result;
                            // pin it until the transaction is dropped.
                            self.newroot = Some(entry.blobref().clone());
                            entry.incref();
                            self.newroot_entry = Some(entry);
                            self.state = State::GenerateKeys;
                        }
                    }
                }
                State::GenerateKeys => {
                    // caller did not drain the previous stall
                    if !self.dirty_cache_entries.is_empty() {
                        return Process::DirtyCacheEntries;
                    }

                    let mut keys = IndexSet::new();
                    let mut bad_key = None;
                    for op in &self.ops {
                        match key::normalize(&op.key) {
                            Ok(normalized) => {
                                keys.insert(normalized);
                            }
                            Err(err) => {
                                bad_key = Some(err);
                                break;
                            }
                        }
                    }
                    if let Some(err) = bad_key {
                        return self.fail(err);
                    }
                    self.keys = Some(keys);

                    if self.flags & COMMIT_SYNC != 0 {
                        self.state = State::SyncContentFlush;
                    } else {
                        self.state = State::Finished;
                    }
                }
                State::SyncContentFlush => match &self.f_sync_content_flush {
                    None => {
                        self.f_sync_content_flush = Some(RpcFuture::new());
                        return Process::SyncContentFlush;
                    }
                    Some(future) => match future.result() {
                        None => {
                            return Process::SyncContentFlush;
                        }
                        Some(Ok(())) => self.state = State::SyncCheckpoint,
                        Some(Err(err)) => return self.fail(err),
                    },
                },
                State::SyncCheckpoint => match &self.f_sync_checkpoint {
                    None => {
                        // when publishing, the checkpointed sequence is
                        // the one this commit is about to become
                        let mut newseq = root_seq;
                        if self.internal_flags & INTERNAL_NO_PUBLISH == 0 {
                            newseq += 1;
                        }
                        self.checkpoint_seq = Some(newseq);
                        self.f_sync_checkpoint = Some(RpcFuture::new());
                        return Process::SyncCheckpoint;
                    }
                    Some(future) => match future.result() {
                        None => {
                            return Process::SyncCheckpoint;
                        }
                        // Nothing fallible may run between checkpoint
                        // success and FINISHED: a checkpointed root must
                        // become the live root.
                        Some(Ok(())) => self.state = State::Finished,
                        Some(Err(err)) => return self.fail(err),
                    },
                },
                State::Finished => return Process::Finished,
            }
        }
    }

    /// Hand each missing blobref to `f`, in the order recorded. The list
    /// is consumed; on callback failure the remainder is discarded.
    pub fn with_missing_refs<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&Blobref) -> Result<(), Error>,
    {
        if self.state != State::LoadRoot && self.state != State::ApplyOps {
            return Err(Error::InvalidInput("no missing refs to iterate"));
        }
        while let Some(blobref) = pop_first(&mut self.missing_refs) {
            if let Err(err) = f(&blobref) {
                self.missing_refs.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Hand each dirty cache entry to `f` for storing, FIFO. Entries are
    /// released from the transaction as they are handed out; if `f` fails,
    /// the failed entry and the remainder are rolled back out of the
    /// cache so no dirty residue of this transaction survives.
    pub fn with_dirty_entries<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&Rc<CacheEntry>) -> Result<(), Error>,
    {
        if self.state != State::GenerateKeys {
            return Err(Error::InvalidInput("no dirty entries to iterate"));
        }
        while let Some(entry) = self.dirty_cache_entries.pop_front() {
            entry.decref();
            if let Err(err) = f(&entry) {
                self.rollback_handed_out_entry(&entry);
                self.cleanup_dirty_cache_list();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Pending content-flush future, available while stalled in
    /// SYNC_CONTENT_FLUSH.
    pub fn sync_content_flush(&self) -> Result<RpcFuture<()>, Error> {
        match (&self.state, &self.f_sync_content_flush) {
            (State::SyncContentFlush, Some(future)) => Ok(future.clone()),
            _ => Err(Error::InvalidInput("no content flush in progress")),
        }
    }

    /// Pending checkpoint future plus the (rootref, sequence) pair to
    /// checkpoint, available while stalled in SYNC_CHECKPOINT.
    pub fn sync_checkpoint(&self) -> Result<(RpcFuture<()>, Blobref, u64), Error> {
        match (&self.state, &self.f_sync_checkpoint, &self.newroot, self.checkpoint_seq)
        {
            (State::SyncCheckpoint, Some(future), Some(newroot), Some(seq)) => {
                Ok((future.clone(), newroot.clone(), seq))
            }
            _ => Err(Error::InvalidInput("no checkpoint in progress")),
        }
    }

    fn fail(&mut self, err: Error) -> Process {
        self.err = Some(err);
        Process::Error
    }

    /// Link (key, dirent) into the working root, restarting from the top
    /// whenever an intermediate symlink rewrites the path.
    fn link_dirent(
        &mut self,
        rootdir: &mut Treeobj,
        key: &str,
        dirent: Option<&Treeobj>,
        op_flags: u32,
        append: &mut bool,
    ) -> Result<Option<Blobref>, Error> {
        let mut key = key::normalize(key)?;
        let mut hops = 0;
        loop {
            if key::is_root(&key) {
                return Err(Error::InvalidInput(
                    "the root directory is not a write target",
                ));
            }
            match self.walk_once(rootdir, &key, dirent, op_flags, append)? {
                Walk::Done => return Ok(None),
                Walk::Missing(blobref) => return Ok(Some(blobref)),
                Walk::FollowLink(rewritten) => {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(Error::SymlinkLimit);
                    }
                    key = key::normalize(&rewritten)?;
                }
            }
        }
    }

    /// One descent from the working root toward the terminal component.
    /// Stops early on a missing dirref blob or an intermediate symlink.
    fn walk_once(
        &mut self,
        rootdir: &mut Treeobj,
        key: &str,
        dirent: Option<&Treeobj>,
        op_flags: u32,
        append: &mut bool,
    ) -> Result<Walk, Error> {
        let mut dir: &mut Treeobj = rootdir;
        let mut name: &str = key;

        while let Some((head, rest)) = name.split_once(key::SEPARATOR) {
            let Treeobj::Dir(entries) = dir else {
                return Err(Error::Unrecoverable(
                    "path component is not a directory".to_string(),
                ));
            };
            dir = match entries.entry(head.to_string()) {
                MapEntry::Vacant(slot) => {
                    if dirent.is_none() {
                        // unlink of a key that does not exist
                        return Ok(Walk::Done);
                    }
                    slot.insert(Treeobj::dir())
                }
                MapEntry::Occupied(mut slot) => {
                    match slot.get() {
                        Treeobj::Dir(_) => {}
                        Treeobj::Dirref(refs) => {
                            if refs.len() != 1 {
                                tracing::error!(
                                    count = refs.len(),
                                    "invalid dirref count"
                                );
                                return Err(Error::Unrecoverable(
                                    "dirref does not hold exactly one blobref"
                                        .to_string(),
                                ));
                            }
                            let blobref = refs[0].clone();
                            let subdir = {
                                let cache = self.cache.borrow();
                                match cache.lookup(&blobref) {
                                    Some(entry) if entry.is_valid() => {
                                        entry.treeobj().map_err(|_| {
                                            Error::Unrecoverable(
                                                "cached dir blob failed to decode"
                                                    .to_string(),
                                            )
                                        })?
                                    }
                                    _ => return Ok(Walk::Missing(blobref)),
                                }
                            };
                            // copy, so the cached original stays pristine
                            slot.insert((*subdir).clone());
                        }
                        Treeobj::Symlink { namespace, target } => {
                            if namespace
                                .as_deref()
                                .is_some_and(|ns| ns != self.namespace.as_ref())
                            {
                                return Err(Error::InvalidInput(
                                    "symlink crosses namespaces",
                                ));
                            }
                            return Ok(Walk::FollowLink(format!("{}.{}", target, rest)));
                        }
                        _ => {
                            if dirent.is_none() {
                                return Ok(Walk::Done);
                            }
                            slot.insert(Treeobj::dir());
                        }
                    }
                    slot.into_mut()
                }
            };
            name = rest;
        }

        // terminal component: add, modify or delete
        let Treeobj::Dir(entries) = dir else {
            return Err(Error::Unrecoverable(
                "path component is not a directory".to_string(),
            ));
        };
        match dirent {
            None => {
                // absent is fine, we are deleting
                entries.remove(name);
            }
            Some(obj) => {
                if op_flags & OP_APPEND != 0 {
                    self.append_dirent(entries, name, obj, append)?;
                } else {
                    // primary insertion, the dirent must be checked
                    obj.validate()?;
                    entries.insert(name.to_string(), obj.clone());
                }
            }
        }
        Ok(Walk::Done)
    }

    /// The append rule. Whatever the existing entry was, a successful
    /// append leaves a valref (or the initial val) in its place.
    fn append_dirent(
        &mut self,
        entries: &mut BTreeMap<String, Treeobj>,
        name: &str,
        dirent: &Treeobj,
        append: &mut bool,
    ) -> Result<(), Error> {
        enum Existing {
            Absent,
            Val(Vec<u8>),
            Valref(Vec<Blobref>),
            Symlink,
            Directory,
        }

        let Treeobj::Val(new_data) = dirent else {
            return Err(Error::BadEncoding("append operand is not a val"));
        };

        let existing = match entries.get(name) {
            None => Existing::Absent,
            Some(Treeobj::Val(data)) => Existing::Val(data.clone()),
            Some(Treeobj::Valref(refs)) => Existing::Valref(refs.clone()),
            Some(Treeobj::Symlink { .. }) => Existing::Symlink,
            Some(Treeobj::Dir(_)) | Some(Treeobj::Dirref(_)) => Existing::Directory,
        };

        match existing {
            Existing::Absent => {
                // Still counted as an append: were it not, a stalled
                // replay could issue the append twice and duplicate data.
                entries.insert(name.to_string(), dirent.clone());
                *append = true;
            }
            Existing::Valref(mut refs) => {
                let blobref = self.store_raw(new_data)?;
                refs.push(blobref);
                entries.insert(name.to_string(), Treeobj::Valref(refs));
                *append = true;
            }
            Existing::Val(old_data) => {
                let first = self.store_raw(&old_data)?;
                let second = self.store_raw(new_data)?;
                let mut valref = Treeobj::valref(first);
                valref.append_blobref(second)?;
                entries.insert(name.to_string(), valref);
                *append = true;
            }
            Existing::Symlink => {
                return Err(Error::NotSupported("append onto a symlink"))
            }
            Existing::Directory => {
                return Err(Error::IsDirectory("append target is a directory"))
            }
        }
        Ok(())
    }

    /// Store dir entries as blobs, converting them to dirrefs; externalize
    /// oversized inline values into valrefs. Depth first, so child dirs
    /// resolve to blobrefs before their parent serializes.
    fn unroll(&mut self, dir: &mut Treeobj) -> Result<(), Error> {
        let Treeobj::Dir(entries) = dir else {
            return Err(Error::Unrecoverable("unroll of a non-directory".to_string()));
        };
        for entry in entries.values_mut() {
            if entry.is_dir() {
                self.unroll(entry)?;
                let stored = self.store_treeobj(entry)?;
                *entry = Treeobj::dirref(stored.blobref().clone());
            } else if entry.is_val() {
                let data = entry.val_bytes()?.to_vec();
                if data.len() > BLOBREF_MAX_STRING_SIZE {
                    let blobref = self.store_raw(&data)?;
                    *entry = Treeobj::valref(blobref);
                }
            }
        }
        Ok(())
    }

    fn store_treeobj(&mut self, obj: &Treeobj) -> Result<Rc<CacheEntry>, Error> {
        obj.validate()?;
        let encoded = obj.encode()?;
        let (needs_flush, entry) = self.store_cache(encoded.as_bytes())?;
        if needs_flush {
            self.add_dirty_entry(&entry);
        }
        Ok(entry)
    }

    fn store_raw(&mut self, data: &[u8]) -> Result<Blobref, Error> {
        let (needs_flush, entry) = self.store_cache(data)?;
        if needs_flush {
            self.add_dirty_entry(&entry);
        }
        Ok(entry.blobref().clone())
    }

    /// Put a blob into the cache under its blobref. Returns whether the
    /// entry still needs flushing to the content store; an already valid
    /// entry is a no-op store.
    fn store_cache(&mut self, data: &[u8]) -> Result<(bool, Rc<CacheEntry>), Error> {
        let blobref = Blobref::hash(self.algo, data);
        let mut cache = self.cache.borrow_mut();
        let entry = match cache.lookup(&blobref) {
            Some(entry) => entry,
            None => {
                let entry = CacheEntry::new(blobref.clone());
                cache.insert(Rc::clone(&entry))?;
                entry
            }
        };
        if entry.is_valid() {
            self.noop_stores.set(self.noop_stores.get() + 1);
            return Ok((false, entry));
        }
        if let Err(err) = entry
            .set_raw(data)
            .and_then(|()| entry.set_dirty(true))
        {
            let _ = cache.remove(&blobref);
            return Err(err.into());
        }
        Ok((true, entry))
    }

    fn add_dirty_entry(&mut self, entry: &Rc<CacheEntry>) {
        entry.incref();
        self.dirty_cache_entries.push_back(Rc::clone(entry));
    }

    /// Undo every dirty entry this transaction still holds: drop the
    /// reference, clear the dirty bit, remove the blob from the cache.
    /// Entries already handed to the caller are not touched; they had no
    /// waiters and their stores either completed or were rolled back by
    /// `with_dirty_entries` itself.
    fn cleanup_dirty_cache_list(&mut self) {
        while let Some(entry) = self.dirty_cache_entries.pop_front() {
            entry.decref();
            self.rollback_handed_out_entry(&entry);
        }
    }

    fn rollback_handed_out_entry(&mut self, entry: &Rc<CacheEntry>) {
        if self
            .newroot_entry
            .as_ref()
            .is_some_and(|pinned| Rc::ptr_eq(pinned, entry))
        {
            entry.decref();
            self.newroot_entry = None;
        }
        if entry.set_dirty(false).is_err() {
            tracing::error!(blobref = %entry.blobref(), "rollback of an invalid entry");
        }
        if self.cache.borrow_mut().remove(entry.blobref()).is_err() {
            // another transaction produced the same blob and still holds
            // it; leave it to that owner
            tracing::warn!(blobref = %entry.blobref(), "rollback left a shared entry");
        }
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if let Some(entry) = self.root_entry.take() {
            entry.decref();
        }
        if let Some(entry) = self.newroot_entry.take() {
            entry.decref();
        }
    }
}

fn pop_first(refs: &mut Vec<Blobref>) -> Option<Blobref> {
    if refs.is_empty() {
        None
    } else {
        Some(refs.remove(0))
    }
}
