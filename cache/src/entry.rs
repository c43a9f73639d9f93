//! A single cached blob and its life cycle.
//!
//! An entry is born *invalid* (no data). `set_raw` makes it *valid* and
//! wakes any waiters; `set_dirty` marks data that still has to reach the
//! content store. Raw data is immutable for the life of the entry, so a
//! valid entry can hand out a shared parsed tree-object view of itself.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use copse_blobref::Blobref;
use copse_treeobj::Treeobj;

use crate::error::CacheError;

/// Callback run when an entry transitions invalid → valid.
pub type Waiter = Box<dyn FnOnce(&CacheEntry)>;

pub struct CacheEntry {
    blobref: Blobref,
    raw: RefCell<Option<Box<[u8]>>>,
    treeobj: RefCell<Option<Rc<Treeobj>>>,
    dirty: Cell<bool>,
    refcount: Cell<usize>,
    waiters: RefCell<VecDeque<Waiter>>,
}

impl CacheEntry {
    pub fn new(blobref: Blobref) -> Rc<Self> {
        Rc::new(CacheEntry {
            blobref,
            raw: RefCell::new(None),
            treeobj: RefCell::new(None),
            dirty: Cell::new(false),
            refcount: Cell::new(0),
            waiters: RefCell::new(VecDeque::new()),
        })
    }

    pub fn blobref(&self) -> &Blobref {
        &self.blobref
    }

    pub fn is_valid(&self) -> bool {
        self.raw.borrow().is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn refcount(&self) -> usize {
        self.refcount.get()
    }

    pub fn incref(&self) {
        self.refcount.set(self.refcount.get() + 1);
    }

    pub fn decref(&self) {
        let count = self.refcount.get();
        debug_assert!(count > 0, "refcount underflow on {}", self.blobref);
        self.refcount.set(count.saturating_sub(1));
    }

    /// Install the blob data, transitioning invalid → valid and waking
    /// waiters in FIFO order. Setting identical data again is a no-op;
    /// different data under the same blobref is corruption.
    pub fn set_raw(&self, data: &[u8]) -> Result<(), CacheError> {
        if let Some(existing) = self.raw.borrow().as_deref() {
            if existing == data {
                return Ok(());
            }
            tracing::error!(blobref = %self.blobref, "blob data mismatch");
            return Err(CacheError::Corruption(self.blobref.to_string()));
        }
        *self.raw.borrow_mut() = Some(data.into());
        self.wake_waiters();
        Ok(())
    }

    pub fn raw(&self) -> Result<std::cell::Ref<'_, [u8]>, CacheError> {
        let raw = self.raw.borrow();
        if raw.is_none() {
            return Err(CacheError::NotValid);
        }
        Ok(std::cell::Ref::map(raw, |r| {
            r.as_deref().unwrap_or_default()
        }))
    }

    /// Parsed tree-object view of the raw data. Parsed once, shared after.
    pub fn treeobj(&self) -> Result<Rc<Treeobj>, CacheError> {
        if let Some(obj) = self.treeobj.borrow().as_ref() {
            return Ok(Rc::clone(obj));
        }
        let obj = {
            let raw = self.raw.borrow();
            let data = raw.as_deref().ok_or(CacheError::NotValid)?;
            Rc::new(Treeobj::decode_bytes(data)?)
        };
        *self.treeobj.borrow_mut() = Some(Rc::clone(&obj));
        Ok(obj)
    }

    /// Flip the dirty bit. Only clean → dirty on a valid entry and
    /// dirty → clean are meaningful; marking an invalid entry dirty is an
    /// error.
    pub fn set_dirty(&self, dirty: bool) -> Result<(), CacheError> {
        if dirty && !self.is_valid() {
            return Err(CacheError::InvalidTransition);
        }
        self.dirty.set(dirty);
        Ok(())
    }

    /// Run `waiter` when this entry has data; immediately if it already
    /// does.
    pub fn wait_valid(&self, waiter: Waiter) {
        if self.is_valid() {
            waiter(self);
        } else {
            self.waiters.borrow_mut().push_back(waiter);
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.borrow().len()
    }

    fn wake_waiters(&self) {
        // pop one at a time so a waiter may register further waiters
        loop {
            let next = self.waiters.borrow_mut().pop_front();
            match next {
                Some(waiter) => waiter(self),
                None => break,
            }
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("blobref", &self.blobref.as_str())
            .field("valid", &self.is_valid())
            .field("dirty", &self.dirty.get())
            .field("refcount", &self.refcount.get())
            .field("waiters", &self.waiters.borrow().len())
            .finish()
    }
}
