mod commit_tests;

use copse_blobref::{Blobref, HashAlgo};
use copse_content::{Checkpoint, ContentError, ContentStore, MemContentStore};

use crate::{Kvs, KvsOptions, Op, TxnBuilder};

pub(crate) fn make_kvs() -> Kvs<MemContentStore> {
    Kvs::open(MemContentStore::new(HashAlgo::Sha1), KvsOptions::default())
        .expect("open on an empty store")
}

pub(crate) fn make_kvs_in(namespace: &str) -> Kvs<MemContentStore> {
    Kvs::open(
        MemContentStore::new(HashAlgo::Sha1),
        KvsOptions {
            namespace: namespace.to_string(),
            algo: HashAlgo::Sha1,
        },
    )
    .expect("open on an empty store")
}

pub(crate) fn put_op(key: &str, value: &str) -> Vec<Op> {
    let mut txn = TxnBuilder::new();
    txn.put(key, value).unwrap();
    txn.into_ops()
}

pub(crate) fn append_op(key: &str, value: &[u8]) -> Vec<Op> {
    let mut txn = TxnBuilder::new();
    txn.append(key, value).unwrap();
    txn.into_ops()
}

pub(crate) fn unlink_op(key: &str) -> Vec<Op> {
    let mut txn = TxnBuilder::new();
    txn.unlink(key).unwrap();
    txn.into_ops()
}

/// Content store wrapper that fails the next N `store` calls, so a test
/// can make one specific commit fail and the retry succeed.
pub(crate) struct FlakyStore {
    inner: MemContentStore,
    fail_stores: usize,
    fail_flushes: usize,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        FlakyStore {
            inner: MemContentStore::new(HashAlgo::Sha1),
            fail_stores: 0,
            fail_flushes: 0,
        }
    }

    pub(crate) fn fail_next_stores(&mut self, count: usize) {
        self.fail_stores = count;
    }

    pub(crate) fn fail_next_flushes(&mut self, count: usize) {
        self.fail_flushes = count;
    }

    pub(crate) fn flush_count(&self) -> u64 {
        self.inner.flush_count()
    }
}

impl ContentStore for FlakyStore {
    fn store(&mut self, data: &[u8]) -> Result<Blobref, ContentError> {
        if self.fail_stores > 0 {
            self.fail_stores -= 1;
            return Err(ContentError::NoSpace);
        }
        self.inner.store(data)
    }

    fn load(&self, blobref: &Blobref) -> Result<Option<Vec<u8>>, ContentError> {
        self.inner.load(blobref)
    }

    fn flush(&mut self) -> Result<(), ContentError> {
        if self.fail_flushes > 0 {
            self.fail_flushes -= 1;
            return Err(ContentError::Backend("flush refused".to_string()));
        }
        self.inner.flush()
    }

    fn checkpoint_commit(
        &mut self,
        name: &str,
        rootref: &Blobref,
        seq: u64,
    ) -> Result<(), ContentError> {
        self.inner.checkpoint_commit(name, rootref, seq)
    }

    fn checkpoint_get(&self, name: &str) -> Option<Checkpoint> {
        self.inner.checkpoint_get(name)
    }
}
