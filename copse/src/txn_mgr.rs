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

//! Ready queue of pending transactions.
//!
//! Transactions commit in strict FIFO order. Adjacent compatible
//! transactions may first be merged into one synthetic transaction so a
//! burst of small commits costs a single tree rewrite; the merged
//! transaction takes the queue position of its first member and the
//! members stay behind it, marked, so a failed merge can fall back to
//! committing them one by one.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use copse_blobref::HashAlgo;
use copse_cache::Cache;

use crate::{
    error::Error,
    flags::{self, COMMIT_NO_MERGE, COMMIT_SYNC, INTERNAL_NO_PUBLISH},
    ops::Op,
    txn::{State, Txn},
};

pub struct TxnMgr {
    cache: Rc<RefCell<Cache>>,
    namespace: Rc<str>,
    algo: HashAlgo,
    /// Stores that found their blob already cached; for stats reporting
    noop_stores: Rc<Cell<u64>>,
    ready: VecDeque<Txn>,
}

impl TxnMgr {
    pub fn new(cache: Rc<RefCell<Cache>>, namespace: &str, algo: HashAlgo) -> TxnMgr {
        TxnMgr {
            cache,
            namespace: Rc::from(namespace),
            algo,
            noop_stores: Rc::new(Cell::new(0)),
            ready: VecDeque::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Construct a transaction and append it to the ready queue.
    pub fn add(
        &mut self,
        name: &str,
        ops: Vec<Op>,
        txn_flags: u32,
        internal_flags: u32,
    ) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::InvalidInput("transaction name is empty"));
        }
        flags::validate(txn_flags, COMMIT_NO_MERGE | COMMIT_SYNC)?;
        flags::validate(internal_flags, INTERNAL_NO_PUBLISH)?;
        for op in &ops {
            flags::validate(op.flags, flags::OP_APPEND)?;
        }
        let txn = Txn::new(
            Rc::clone(&self.cache),
            Rc::clone(&self.namespace),
            self.algo,
            Rc::clone(&self.noop_stores),
            Some(name),
            ops,
            txn_flags,
            internal_flags,
        );
        self.ready.push_back(txn);
        Ok(())
    }

    /// True when the head transaction exists and is not blocked on a
    /// stall the caller has yet to satisfy.
    pub fn ready(&self) -> bool {
        self.ready.front().is_some_and(|txn| !txn.is_blocked())
    }

    /// The head transaction, marked as being processed. A blocked head is
    /// only handed back to the caller already processing it.
    pub fn get_ready(&mut self) -> Option<&mut Txn> {
        let txn = self.ready.front_mut()?;
        if !txn.processing && txn.is_blocked() {
            return None;
        }
        txn.processing = true;
        Some(txn)
    }

    /// Remove the transaction currently being processed. When it was a
    /// merged transaction, `fallback` decides the fate of its members:
    /// retried individually (with merging disabled) or discarded with it.
    pub fn remove_ready(&mut self, fallback: bool) -> Option<Txn> {
        if !self.ready.front().is_some_and(|txn| txn.processing) {
            return None;
        }
        let txn = self.ready.pop_front()?;
        if txn.merged {
            if fallback {
                for member in self.ready.iter_mut() {
                    if !member.merge_component {
                        break;
                    }
                    member.merge_component = false;
                    member.flags |= COMMIT_NO_MERGE;
                }
            } else {
                while self
                    .ready
                    .front()
                    .is_some_and(|member| member.merge_component)
                {
                    self.ready.pop_front();
                }
            }
        }
        Some(txn)
    }

    /// Merge the head run of compatible ready transactions into one
    /// synthetic transaction pushed at the head of the queue.
    ///
    /// Only adjacent transactions merge: a non-mergeable transaction is a
    /// barrier, otherwise later operations could overtake it.
    pub fn merge_ready(&mut self) -> Result<(), Error> {
        let first = match self.ready.front() {
            Some(txn) => txn,
            None => return Ok(()),
        };
        // the head must still be able to absorb more ops
        if first.error().is_some()
            || first.aux_error().is_some()
            || first.state > State::ApplyOps
            || first.no_merge()
            || first.merged
        {
            return Ok(());
        }
        let txn_flags = first.flags;
        let internal_flags = first.internal_flags;

        let mut count = 1;
        for member in self.ready.iter().skip(1) {
            if member.no_merge()
                || member.flags != txn_flags
                || member.internal_flags != internal_flags
            {
                break;
            }
            count += 1;
        }
        if count < 2 {
            return Ok(());
        }

        let mut merged = Txn::new(
            Rc::clone(&self.cache),
            Rc::clone(&self.namespace),
            self.algo,
            Rc::clone(&self.noop_stores),
            None,
            Vec::new(),
            txn_flags,
            internal_flags,
        );
        merged.merged = true;
        for member in self.ready.iter().take(count) {
            merged.names.extend(member.names.iter().cloned());
            merged.ops.extend(member.ops.iter().cloned());
        }
        for member in self.ready.iter_mut().take(count) {
            // a member the caller already picked up must be re-fetched
            member.processing = false;
            member.merge_component = true;
        }
        self.ready.push_front(merged);
        Ok(())
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn noop_stores(&self) -> u64 {
        self.noop_stores.get()
    }

    pub fn clear_noop_stores(&self) {
        self.noop_stores.set(0);
    }
}
