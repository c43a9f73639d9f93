//! Hash-map backed content store.

use std::collections::{HashMap, HashSet};

use copse_blobref::{Blobref, HashAlgo};

use crate::{Checkpoint, ContentError, ContentStore};

pub struct MemContentStore {
    algo: HashAlgo,
    blobs: HashMap<Blobref, Vec<u8>>,
    unflushed: HashSet<Blobref>,
    checkpoints: HashMap<String, Checkpoint>,
    /// Total payload bytes the backend will accept, when bounded
    capacity: Option<usize>,
    used: usize,
    store_count: u64,
    flush_count: u64,
}

impl MemContentStore {
    pub fn new(algo: HashAlgo) -> Self {
        MemContentStore {
            algo,
            blobs: HashMap::new(),
            unflushed: HashSet::new(),
            checkpoints: HashMap::new(),
            capacity: None,
            used: 0,
            store_count: 0,
            flush_count: 0,
        }
    }

    pub fn with_capacity_limit(algo: HashAlgo, capacity: usize) -> Self {
        let mut store = MemContentStore::new(algo);
        store.capacity = Some(capacity);
        store
    }

    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    pub fn contains(&self, blobref: &Blobref) -> bool {
        self.blobs.contains_key(blobref)
    }

    /// Blobs stored but not yet covered by a flush.
    pub fn unflushed_count(&self) -> usize {
        self.unflushed.len()
    }

    pub fn store_count(&self) -> u64 {
        self.store_count
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }
}

impl ContentStore for MemContentStore {
    fn store(&mut self, data: &[u8]) -> Result<Blobref, ContentError> {
        self.store_count += 1;
        let blobref = Blobref::hash(self.algo, data);
        if self.blobs.contains_key(&blobref) {
            return Ok(blobref);
        }
        if let Some(capacity) = self.capacity {
            if self.used + data.len() > capacity {
                return Err(ContentError::NoSpace);
            }
        }
        self.used += data.len();
        self.blobs.insert(blobref.clone(), data.to_vec());
        self.unflushed.insert(blobref.clone());
        Ok(blobref)
    }

    fn load(&self, blobref: &Blobref) -> Result<Option<Vec<u8>>, ContentError> {
        Ok(self.blobs.get(blobref).cloned())
    }

    fn flush(&mut self) -> Result<(), ContentError> {
        self.unflushed.clear();
        self.flush_count += 1;
        Ok(())
    }

    fn checkpoint_commit(
        &mut self,
        name: &str,
        rootref: &Blobref,
        seq: u64,
    ) -> Result<(), ContentError> {
        if let Some(existing) = self.checkpoints.get(name) {
            if seq < existing.seq {
                return Err(ContentError::StaleCheckpoint {
                    current: existing.seq,
                    proposed: seq,
                });
            }
        }
        self.checkpoints.insert(
            name.to_string(),
            Checkpoint {
                rootref: rootref.clone(),
                seq,
            },
        );
        Ok(())
    }

    fn checkpoint_get(&self, name: &str) -> Option<Checkpoint> {
        self.checkpoints.get(name).cloned()
    }
}
