use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use super::{append_op, make_kvs, put_op, unlink_op};
use crate::{
    flags::{LOOKUP_READDIR, LOOKUP_TREEOBJ},
    Error, Kvs, KvsOptions, LookupResult, MemContentStore, Treeobj, TxnBuilder,
    BLOBREF_MAX_STRING_SIZE, HashAlgo,
};

#[test]
fn basic_commit_creates_intermediate_dirs() {
    let mut kvs = make_kvs();
    let result = kvs.commit("t1", put_op("a.b.c", "hi"), 0).unwrap();

    assert_eq!(result.rootseq, 1);
    assert_eq!(result.keys, vec!["a.b.c".to_string()]);
    assert_eq!(kvs.get("a.b.c").unwrap(), b"hi");
    assert_eq!(kvs.getroot().rootref, result.rootref);

    match kvs.lookup("a", LOOKUP_READDIR).unwrap() {
        LookupResult::Directory(dir) => {
            assert_eq!(dir.count(), 1);
            assert!(dir.entry("b").is_ok());
        }
        other => panic!("expected a directory, got {:?}", other),
    }
}

#[test]
fn rootseq_increases_by_one_per_commit() {
    let mut kvs = make_kvs();
    for i in 1..=5u64 {
        let result = kvs
            .commit("t", put_op("k", &format!("v{}", i)), 0)
            .unwrap();
        assert_eq!(result.rootseq, i);
    }
    assert_eq!(kvs.getroot().rootseq, 5);
}

#[test]
fn empty_transaction_commits_the_existing_root() {
    let mut kvs = make_kvs();
    let before = kvs.commit("seed", put_op("a", "1"), 0).unwrap();
    let empty = kvs.commit("empty", Vec::new(), 0).unwrap();
    assert_eq!(empty.rootref, before.rootref);
    assert_eq!(empty.rootseq, before.rootseq + 1);
    assert!(empty.keys.is_empty());
}

#[test]
fn unlink_is_idempotent() {
    let mut kvs = make_kvs();
    kvs.commit("seed", put_op("a.b", "x"), 0).unwrap();

    let gone = kvs.commit("rm", unlink_op("a.b"), 0).unwrap();
    assert_matches!(kvs.get("a.b"), Err(Error::NoEntry(_)));

    // removing it again succeeds and leaves the root untouched
    let again = kvs.commit("rm2", unlink_op("a.b"), 0).unwrap();
    assert_eq!(again.rootref, gone.rootref);
    assert_eq!(again.rootseq, gone.rootseq + 1);

    // and so does unlinking a key whose parent path never existed
    let noent = kvs.commit("rm3", unlink_op("no.such.path"), 0).unwrap();
    assert_eq!(noent.rootref, gone.rootref);
}

#[test]
fn append_converts_val_to_valref() {
    let mut kvs = make_kvs();
    kvs.commit("seed", put_op("a", "A"), 0).unwrap();

    let mut txn = TxnBuilder::new();
    txn.append("a", b"B").unwrap();
    txn.append("a", b"C").unwrap();
    kvs.commit("appends", txn.into_ops(), 0).unwrap();

    assert_eq!(kvs.get("a").unwrap(), b"ABC");
    match kvs.lookup("a", LOOKUP_TREEOBJ).unwrap() {
        LookupResult::Object(Treeobj::Valref(refs)) => assert_eq!(refs.len(), 3),
        other => panic!("expected a valref, got {:?}", other),
    }
}

#[test]
fn appends_across_commits_concatenate_in_order() {
    let mut kvs = make_kvs();
    for piece in ["one", "two", "three"] {
        kvs.commit("log", append_op("log", piece.as_bytes()), 0)
            .unwrap();
    }
    assert_eq!(kvs.get("log").unwrap(), b"onetwothree");
}

#[test]
fn append_to_absent_key_inserts() {
    let mut kvs = make_kvs();
    kvs.commit("a1", append_op("fresh", b"data"), 0).unwrap();
    assert_eq!(kvs.get("fresh").unwrap(), b"data");
    // the initial insertion stays an inline val
    match kvs.lookup("fresh", LOOKUP_TREEOBJ).unwrap() {
        LookupResult::Object(obj) => assert!(obj.is_val()),
        other => panic!("expected an object, got {:?}", other),
    }
}

#[test]
fn append_onto_directory_fails() {
    let mut kvs = make_kvs();
    kvs.commit("seed", put_op("dir.k", "v"), 0).unwrap();
    let err = kvs.commit("bad", append_op("dir", b"x"), 0).unwrap_err();
    assert_matches!(err, Error::IsDirectory(_));
}

#[test]
fn append_onto_symlink_fails() {
    let mut kvs = make_kvs();
    let mut txn = TxnBuilder::new();
    txn.symlink("link", None, "target").unwrap();
    kvs.commit("seed", txn.into_ops(), 0).unwrap();

    let err = kvs.commit("bad", append_op("link", b"x"), 0).unwrap_err();
    assert_matches!(err, Error::NotSupported(_));
}

#[test]
fn large_values_are_externalized() {
    let mut kvs = make_kvs();
    let big = vec![7u8; BLOBREF_MAX_STRING_SIZE * 4];
    let mut txn = TxnBuilder::new();
    txn.put_raw("big", &big).unwrap();
    txn.put_raw("small", b"tiny").unwrap();
    kvs.commit("t", txn.into_ops(), 0).unwrap();

    match kvs.lookup("big", LOOKUP_TREEOBJ).unwrap() {
        LookupResult::Object(obj) => assert!(obj.is_valref()),
        other => panic!("expected an object, got {:?}", other),
    }
    match kvs.lookup("small", LOOKUP_TREEOBJ).unwrap() {
        LookupResult::Object(obj) => assert!(obj.is_val()),
        other => panic!("expected an object, got {:?}", other),
    }
    assert_eq!(kvs.get("big").unwrap(), big);
}

#[test]
fn write_through_symlink() {
    let mut kvs = make_kvs();
    let mut seed = TxnBuilder::new();
    seed.symlink("x", None, "y").unwrap();
    seed.put("y.k", "v").unwrap();
    kvs.commit("seed", seed.into_ops(), 0).unwrap();

    let result = kvs.commit("via-link", put_op("x.k", "w"), 0).unwrap();
    assert_eq!(result.keys, vec!["x.k".to_string()]);
    assert_eq!(kvs.get("y.k").unwrap(), b"w");
    assert_eq!(kvs.get("x.k").unwrap(), b"w");
}

#[test]
fn symlink_with_matching_namespace_is_followed() {
    let mut kvs = make_kvs();
    let mut seed = TxnBuilder::new();
    seed.symlink("x", Some("primary"), "y").unwrap();
    seed.put("y.k", "v").unwrap();
    kvs.commit("seed", seed.into_ops(), 0).unwrap();

    kvs.commit("via-link", put_op("x.k", "w"), 0).unwrap();
    assert_eq!(kvs.get("y.k").unwrap(), b"w");
}

#[test]
fn cross_namespace_symlink_is_rejected() {
    let mut kvs = make_kvs();
    let mut seed = TxnBuilder::new();
    seed.symlink("x", Some("other"), "y").unwrap();
    seed.put("y.k", "v").unwrap();
    let before = kvs.commit("seed", seed.into_ops(), 0).unwrap();

    let err = kvs.commit("bad", put_op("x.k", "w"), 0).unwrap_err();
    assert_matches!(err, Error::InvalidInput(_));
    // root unchanged
    assert_eq!(kvs.getroot().rootref, before.rootref);
    assert_eq!(kvs.get("y.k").unwrap(), b"v");
}

#[test]
fn symlink_cycle_is_bounded() {
    let mut kvs = make_kvs();
    let mut seed = TxnBuilder::new();
    seed.symlink("a", None, "b").unwrap();
    seed.symlink("b", None, "a").unwrap();
    kvs.commit("seed", seed.into_ops(), 0).unwrap();

    let err = kvs.commit("bad", put_op("a.k", "v"), 0).unwrap_err();
    assert_matches!(err, Error::SymlinkLimit);
}

#[test]
fn root_is_not_a_write_target() {
    let mut kvs = make_kvs();
    let mut txn = TxnBuilder::new();
    txn.put(".", "x").unwrap();
    let err = kvs.commit("bad", txn.into_ops(), 0).unwrap_err();
    assert_matches!(err, Error::InvalidInput(_));
}

#[test]
fn failed_transaction_leaves_no_partial_state() {
    let mut kvs = make_kvs();
    let mut seed = TxnBuilder::new();
    seed.put("keep", "safe").unwrap();
    seed.symlink("lnk", Some("other"), "t").unwrap();
    kvs.commit("seed", seed.into_ops(), 0).unwrap();

    // the first op would succeed alone; walking through the
    // cross-namespace link fails the transaction as a whole
    let mut bad = TxnBuilder::new();
    bad.put("new.key", "x").unwrap();
    bad.put("lnk.inside", "y").unwrap();

    let before = kvs.getroot();
    let err = kvs.commit("bad", bad.into_ops(), 0).unwrap_err();
    assert_matches!(err, Error::InvalidInput(_));

    assert_eq!(kvs.getroot(), before);
    assert_eq!(kvs.get("keep").unwrap(), b"safe");
    assert_matches!(kvs.get("new.key"), Err(Error::NoEntry(_)));
}

#[test]
fn store_failure_rolls_back_dirty_entries() {
    let mut kvs = Kvs::open(super::FlakyStore::new(), KvsOptions::default()).unwrap();
    kvs.commit("seed", put_op("a", "1"), 0).unwrap();
    let before = kvs.getroot();

    kvs.content_store_mut().fail_next_stores(8);
    let err = kvs.commit("doomed", put_op("b.c", "2"), 0).unwrap_err();
    assert_matches!(err, Error::NoSpace);

    // the root did not move and the cache holds no dirty residue
    assert_eq!(kvs.getroot(), before);
    assert_eq!(kvs.get("a").unwrap(), b"1");
    assert_matches!(kvs.get("b.c"), Err(Error::NoEntry(_)));

    // and a later commit goes through cleanly
    kvs.content_store_mut().fail_next_stores(0);
    kvs.commit("retry", put_op("b.c", "2"), 0).unwrap();
    assert_eq!(kvs.get("b.c").unwrap(), b"2");
}

#[test]
fn no_space_without_room_for_anything() {
    let empty_root = Treeobj::dir().encode().unwrap();
    let store =
        MemContentStore::with_capacity_limit(HashAlgo::Sha1, empty_root.len());
    let mut kvs = Kvs::open(store, KvsOptions::default()).unwrap();
    let err = kvs.commit("t", put_op("a", "1"), 0).unwrap_err();
    assert_matches!(err, Error::NoSpace);
    assert_eq!(kvs.getroot().rootseq, 0);
}

#[test]
fn overwriting_a_subtree_with_a_value_discards_it() {
    let mut kvs = make_kvs();
    kvs.commit("seed", put_op("a.b.c", "deep"), 0).unwrap();
    kvs.commit("clobber", put_op("a", "flat"), 0).unwrap();

    assert_eq!(kvs.get("a").unwrap(), b"flat");
    assert_matches!(kvs.get("a.b.c"), Err(Error::NotDirectory(_)));
}

#[test]
fn unlinking_a_subtree_removes_descendants() {
    let mut kvs = make_kvs();
    let mut seed = TxnBuilder::new();
    seed.put("top.x", "1").unwrap();
    seed.put("top.sub.y", "2").unwrap();
    seed.put("other", "3").unwrap();
    kvs.commit("seed", seed.into_ops(), 0).unwrap();

    kvs.commit("rm", unlink_op("top"), 0).unwrap();
    assert_matches!(kvs.get("top.x"), Err(Error::NoEntry(_)));
    assert_eq!(kvs.get("other").unwrap(), b"3");
}

#[test]
fn transaction_ops_apply_in_order() {
    let mut kvs = make_kvs();
    let mut txn = TxnBuilder::new();
    txn.put("k", "first").unwrap();
    txn.unlink("k").unwrap();
    txn.put("k", "second").unwrap();
    txn.append("k", b"+tail").unwrap();
    let result = kvs.commit("t", txn.into_ops(), 0).unwrap();

    assert_eq!(kvs.get("k").unwrap(), b"second+tail");
    // touched keys are deduplicated
    assert_eq!(result.keys, vec!["k".to_string()]);
}

#[test]
fn uncompacted_append_overwrite_append_still_commits() {
    // compaction refuses this op list; committed as-is, the overwrite
    // wins and the trailing append lands on top of it
    let mut kvs = make_kvs();
    let mut txn = TxnBuilder::new();
    txn.append("a", b"A").unwrap();
    txn.put("a", "B").unwrap();
    txn.append("a", b"C").unwrap();
    assert_matches!(txn.clone().compact(), Err(Error::InvalidInput(_)));

    kvs.commit("t", txn.into_ops(), 0).unwrap();
    assert_eq!(kvs.get("a").unwrap(), b"BC");
}

#[test]
fn keys_are_normalized_in_the_touched_set() {
    let mut kvs = make_kvs();
    let mut txn = TxnBuilder::new();
    txn.put(".a..b.", "1").unwrap();
    txn.put("a.b", "2").unwrap();
    let result = kvs.commit("t", txn.into_ops(), 0).unwrap();
    assert_eq!(result.keys, vec!["a.b".to_string()]);
    assert_eq!(kvs.get("a.b").unwrap(), b"2");
}

#[test]
fn commit_reuses_identical_blobs() {
    let mut kvs = make_kvs();
    kvs.commit("one", put_op("a", "same"), 0).unwrap();
    kvs.clear_noop_stores();
    // writing the identical value again produces identical blobs
    kvs.commit("two", put_op("a", "same"), 0).unwrap();
    assert!(kvs.noop_stores() > 0);
}
