use assert_matches::assert_matches;
use copse_blobref::{Blobref, HashAlgo};
use copse_treeobj::{Treeobj, TreeobjError};

fn bref(data: &[u8]) -> Blobref {
    Blobref::hash(HashAlgo::Sha1, data)
}

#[test]
fn constructors_create_expected_variants() {
    assert_eq!(Treeobj::dir(), Treeobj::Dir(Default::default()));
    assert_eq!(Treeobj::val(b"hi".to_vec()), Treeobj::Val(b"hi".to_vec()));
    assert_eq!(
        Treeobj::valref(bref(b"a")),
        Treeobj::Valref(vec![bref(b"a")])
    );
    assert_eq!(
        Treeobj::dirref(bref(b"d")),
        Treeobj::Dirref(vec![bref(b"d")])
    );
    assert_eq!(
        Treeobj::symlink(None, "a.b").unwrap(),
        Treeobj::Symlink {
            namespace: None,
            target: "a.b".to_string()
        }
    );
    assert_eq!(
        Treeobj::symlink(Some("ns"), "a.b").unwrap(),
        Treeobj::Symlink {
            namespace: Some("ns".to_string()),
            target: "a.b".to_string()
        }
    );
}

#[test]
fn symlink_rejects_empty_fields() {
    assert_matches!(
        Treeobj::symlink(None, ""),
        Err(TreeobjError::InvalidInput(_))
    );
    assert_matches!(
        Treeobj::symlink(Some(""), "a"),
        Err(TreeobjError::InvalidInput(_))
    );
}

#[test]
fn type_predicates_and_counts() {
    let dir = Treeobj::dir();
    assert!(dir.is_dir());
    assert_eq!(dir.count(), 0);
    assert_eq!(dir.type_str(), "dir");

    let val = Treeobj::val(b"abc".to_vec());
    assert!(val.is_val());
    assert_eq!(val.count(), 1);

    let mut valref = Treeobj::valref(bref(b"1"));
    valref.append_blobref(bref(b"2")).unwrap();
    assert!(valref.is_valref());
    assert_eq!(valref.count(), 2);

    let dirref = Treeobj::dirref(bref(b"d"));
    assert!(dirref.is_dirref());
    assert_eq!(dirref.count(), 1);

    let link = Treeobj::symlink(None, "t").unwrap();
    assert!(link.is_symlink());
    assert_eq!(link.count(), 1);
}

#[test]
fn dir_insert_get_delete() {
    let mut dir = Treeobj::dir();
    dir.insert_entry("a", Treeobj::val(b"1".to_vec())).unwrap();
    dir.insert_entry("b", Treeobj::val(b"2".to_vec())).unwrap();
    assert_eq!(dir.count(), 2);
    assert_eq!(dir.entry("a").unwrap().val_bytes().unwrap(), b"1");

    // overwrite
    dir.insert_entry("a", Treeobj::val(b"9".to_vec())).unwrap();
    assert_eq!(dir.entry("a").unwrap().val_bytes().unwrap(), b"9");

    dir.delete_entry("a").unwrap();
    assert_matches!(dir.entry("a"), Err(TreeobjError::NoEntry(_)));
    assert_matches!(dir.delete_entry("a"), Err(TreeobjError::NoEntry(_)));
    assert_eq!(dir.count(), 1);
}

#[test]
fn dir_rejects_separator_in_entry_name() {
    let mut dir = Treeobj::dir();
    assert_matches!(
        dir.insert_entry("a.b", Treeobj::val(vec![])),
        Err(TreeobjError::InvalidInput(_))
    );
    assert_matches!(
        dir.insert_entry("", Treeobj::val(vec![])),
        Err(TreeobjError::InvalidInput(_))
    );
}

#[test]
fn insert_validates_child_but_unchecked_does_not() {
    let mut dir = Treeobj::dir();
    let invalid = Treeobj::Valref(vec![]);
    assert_matches!(
        dir.insert_entry("a", invalid.clone()),
        Err(TreeobjError::InvalidInput(_))
    );
    // the unchecked variant takes it, and validate() then flags the tree
    dir.insert_entry_unchecked("a", invalid).unwrap();
    assert_matches!(dir.validate(), Err(TreeobjError::InvalidInput(_)));
}

#[test]
fn non_dir_operations_report_wrong_type() {
    let val = Treeobj::val(b"x".to_vec());
    assert_matches!(val.entry("a"), Err(TreeobjError::WrongType(_)));
    assert_matches!(val.blobrefs(), Err(TreeobjError::WrongType(_)));
    assert_matches!(val.symlink_target(), Err(TreeobjError::WrongType(_)));

    let mut link = Treeobj::symlink(None, "t").unwrap();
    assert_matches!(
        link.append_blobref(bref(b"x")),
        Err(TreeobjError::WrongType(_))
    );
    assert_matches!(link.val_bytes(), Err(TreeobjError::WrongType(_)));
}

#[test]
fn blobref_accessors() {
    let mut valref = Treeobj::valref(bref(b"one"));
    valref.append_blobref(bref(b"two")).unwrap();
    assert_eq!(valref.blobref(0).unwrap(), &bref(b"one"));
    assert_eq!(valref.blobref(1).unwrap(), &bref(b"two"));
    assert_matches!(valref.blobref(2), Err(TreeobjError::InvalidInput(_)));
    assert_eq!(valref.blobrefs().unwrap().len(), 2);
}

#[test]
fn clone_is_a_deep_copy() {
    let mut dir = Treeobj::dir();
    let mut sub = Treeobj::dir();
    sub.insert_entry("k", Treeobj::val(b"v".to_vec())).unwrap();
    dir.insert_entry("sub", sub).unwrap();

    let mut cpy = dir.clone();
    cpy.entry_mut("sub")
        .unwrap()
        .insert_entry("k2", Treeobj::val(b"w".to_vec()))
        .unwrap();

    assert_eq!(dir.entry("sub").unwrap().count(), 1);
    assert_eq!(cpy.entry("sub").unwrap().count(), 2);
}

#[test]
fn valref_buf_chunking() {
    // whole buffer when maxblob is zero
    let whole = Treeobj::valref_buf(HashAlgo::Sha1, 0, b"abcdef");
    assert_eq!(whole.count(), 1);
    assert_eq!(whole.blobref(0).unwrap(), &bref(b"abcdef"));

    // exact split
    let split = Treeobj::valref_buf(HashAlgo::Sha1, 2, b"abcdef");
    assert_eq!(split.count(), 3);
    assert_eq!(split.blobref(0).unwrap(), &bref(b"ab"));
    assert_eq!(split.blobref(1).unwrap(), &bref(b"cd"));
    assert_eq!(split.blobref(2).unwrap(), &bref(b"ef"));

    // ragged tail
    let ragged = Treeobj::valref_buf(HashAlgo::Sha1, 4, b"abcdef");
    assert_eq!(ragged.count(), 2);
    assert_eq!(ragged.blobref(1).unwrap(), &bref(b"ef"));

    // zero-length input yields the empty blob's ref
    let empty = Treeobj::valref_buf(HashAlgo::Sha1, 16, b"");
    assert_eq!(empty.count(), 1);
    assert_eq!(empty.blobref(0).unwrap(), &bref(b""));
}

#[test]
fn display_is_compact() {
    assert_eq!(Treeobj::val(b"abc".to_vec()).to_string(), "val(3 bytes)");
    assert_eq!(Treeobj::dir().to_string(), "dir(0 entries)");
    assert_eq!(
        Treeobj::symlink(Some("ns"), "a.b").unwrap().to_string(),
        "symlink(ns::a.b)"
    );
}
