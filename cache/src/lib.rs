//! In-memory cache of content-store blobs, keyed by blobref.
//!
//! The cache never performs I/O on its own: the commit pipeline records
//! which blobrefs are missing, the surrounding service loads them, and the
//! loaded bytes land here via [`CacheEntry::set_raw`]. Entries the pipeline
//! produced but has not yet flushed are held *dirty* and are never evicted.
//!
//! Everything runs on the single service reactor, so entries use interior
//! mutability instead of locks and are shared as `Rc` handles.

mod entry;
mod error;

use std::{collections::HashMap, rc::Rc};

use copse_blobref::Blobref;

pub use crate::{
    entry::{CacheEntry, Waiter},
    error::CacheError,
};

#[derive(Default)]
pub struct Cache {
    entries: HashMap<Blobref, Rc<CacheEntry>>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    /// Handle to an entry if present. Never triggers a load.
    pub fn lookup(&self, blobref: &Blobref) -> Option<Rc<CacheEntry>> {
        self.entries.get(blobref).map(Rc::clone)
    }

    /// Insert a fresh entry. The blobref must not be cached yet.
    pub fn insert(&mut self, entry: Rc<CacheEntry>) -> Result<(), CacheError> {
        let blobref = entry.blobref().clone();
        if self.entries.contains_key(&blobref) {
            return Err(CacheError::Exists(blobref.to_string()));
        }
        self.entries.insert(blobref, entry);
        Ok(())
    }

    /// Remove an entry. Refused while the entry is dirty or externally
    /// referenced; rollback paths clear those first. Returns whether an
    /// entry was actually removed.
    pub fn remove(&mut self, blobref: &Blobref) -> Result<bool, CacheError> {
        match self.entries.get(blobref) {
            None => Ok(false),
            Some(entry) => {
                if entry.is_dirty() {
                    return Err(CacheError::Dirty);
                }
                if entry.refcount() > 0 {
                    return Err(CacheError::Busy);
                }
                self.entries.remove(blobref);
                Ok(true)
            }
        }
    }

    /// Evict every valid, clean, unreferenced entry nobody is waiting on.
    /// Returns the number evicted.
    pub fn drop_clean_unreferenced(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !(entry.is_valid()
                && !entry.is_dirty()
                && entry.refcount() == 0
                && entry.waiter_count() == 0)
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of dirty entries, for stats reporting.
    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_dirty()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use assert_matches::assert_matches;
    use copse_blobref::HashAlgo;
    use copse_treeobj::Treeobj;

    use super::*;

    fn entry_for(data: &[u8]) -> (Blobref, Rc<CacheEntry>) {
        let blobref = Blobref::hash(HashAlgo::Sha1, data);
        let entry = CacheEntry::new(blobref.clone());
        (blobref, entry)
    }

    #[test]
    fn lookup_insert_remove() {
        let mut cache = Cache::new();
        let (blobref, entry) = entry_for(b"a");
        assert!(cache.lookup(&blobref).is_none());
        cache.insert(Rc::clone(&entry)).unwrap();
        assert!(cache.lookup(&blobref).is_some());
        assert_matches!(
            cache.insert(CacheEntry::new(blobref.clone())),
            Err(CacheError::Exists(_))
        );
        assert!(cache.remove(&blobref).unwrap());
        assert!(!cache.remove(&blobref).unwrap());
    }

    #[test]
    fn set_raw_validates_and_wakes_in_fifo_order() {
        let (_, entry) = entry_for(b"payload");
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = Rc::clone(&order);
            entry.wait_valid(Box::new(move |e| {
                assert!(e.is_valid());
                order.borrow_mut().push(i);
            }));
        }
        assert_eq!(entry.waiter_count(), 3);
        entry.set_raw(b"payload").unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(entry.waiter_count(), 0);

        // a waiter registered after validity fires immediately
        let order2 = Rc::clone(&order);
        entry.wait_valid(Box::new(move |_| order2.borrow_mut().push(9)));
        assert_eq!(*order.borrow(), vec![0, 1, 2, 9]);
    }

    #[test]
    fn set_raw_idempotent_same_data_corruption_otherwise() {
        let (_, entry) = entry_for(b"x");
        entry.set_raw(b"x").unwrap();
        entry.set_raw(b"x").unwrap();
        assert_matches!(entry.set_raw(b"y"), Err(CacheError::Corruption(_)));
        assert_eq!(&*entry.raw().unwrap(), b"x");
    }

    #[test]
    fn dirty_transitions() {
        let (_, entry) = entry_for(b"d");
        // cannot dirty an invalid entry
        assert_matches!(entry.set_dirty(true), Err(CacheError::InvalidTransition));
        entry.set_raw(b"d").unwrap();
        entry.set_dirty(true).unwrap();
        assert!(entry.is_dirty());
        entry.set_dirty(false).unwrap();
        assert!(!entry.is_dirty());
    }

    #[test]
    fn remove_refuses_dirty_and_referenced() {
        let mut cache = Cache::new();
        let (blobref, entry) = entry_for(b"keep");
        entry.set_raw(b"keep").unwrap();
        entry.set_dirty(true).unwrap();
        cache.insert(Rc::clone(&entry)).unwrap();
        assert_matches!(cache.remove(&blobref), Err(CacheError::Dirty));

        entry.set_dirty(false).unwrap();
        entry.incref();
        assert_matches!(cache.remove(&blobref), Err(CacheError::Busy));
        entry.decref();
        assert!(cache.remove(&blobref).unwrap());
    }

    #[test]
    fn eviction_spares_dirty_invalid_and_referenced() {
        let mut cache = Cache::new();

        let (_, clean) = entry_for(b"clean");
        clean.set_raw(b"clean").unwrap();
        cache.insert(clean).unwrap();

        let (_, dirty) = entry_for(b"dirty");
        dirty.set_raw(b"dirty").unwrap();
        dirty.set_dirty(true).unwrap();
        cache.insert(dirty).unwrap();

        let (_, pending) = entry_for(b"pending");
        cache.insert(pending).unwrap();

        let (_, held) = entry_for(b"held");
        held.set_raw(b"held").unwrap();
        held.incref();
        cache.insert(held).unwrap();

        assert_eq!(cache.drop_clean_unreferenced(), 1);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.dirty_count(), 1);
    }

    #[test]
    fn treeobj_view_is_parsed_once_and_shared() {
        let dir = Treeobj::dir();
        let encoded = dir.encode().unwrap();
        let blobref = Blobref::hash(HashAlgo::Sha1, encoded.as_bytes());
        let entry = CacheEntry::new(blobref);

        assert_matches!(entry.treeobj(), Err(CacheError::NotValid));
        entry.set_raw(encoded.as_bytes()).unwrap();
        let a = entry.treeobj().unwrap();
        let b = entry.treeobj().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(a.is_dir());
    }

    #[test]
    fn treeobj_view_of_garbage_is_an_error() {
        let (_, entry) = entry_for(b"not json");
        entry.set_raw(b"not json").unwrap();
        assert_matches!(entry.treeobj(), Err(CacheError::Treeobj(_)));
    }
}
