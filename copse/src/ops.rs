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

//! Encoded operations and the client-side transaction builder.
//!
//! A transaction is an ordered list of operations. Each operation assigns
//! a new tree object to a key; a missing (`null`) dirent removes the key.
//! Commit applies the whole list in order, all or nothing.
//!
//! Values are always carried as `val` tree objects, base64 on the wire,
//! even when the payload happens to be JSON text.

use copse_treeobj::Treeobj;
use serde::{Deserialize, Serialize};

use crate::{
    compact,
    error::Error,
    flags::{self, OP_APPEND},
};

/// Wire form of one transaction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub key: String,
    pub flags: u32,
    pub dirent: Option<Treeobj>,
}

impl Op {
    pub fn new(key: &str, flags: u32, dirent: Option<Treeobj>) -> Result<Self, Error> {
        if key.is_empty() {
            return Err(Error::InvalidKey(key.to_string()));
        }
        flags::validate(flags, OP_APPEND)?;
        Ok(Op {
            key: key.to_string(),
            flags,
            dirent,
        })
    }

    pub fn is_append(&self) -> bool {
        self.flags & OP_APPEND != 0
    }

    pub fn is_unlink(&self) -> bool {
        self.dirent.is_none()
    }
}

/// Ordered list of operations under construction by a client.
#[derive(Debug, Default, Clone)]
pub struct TxnBuilder {
    ops: Vec<Op>,
}

impl TxnBuilder {
    pub fn new() -> Self {
        TxnBuilder::default()
    }

    pub fn put(&mut self, key: &str, value: &str) -> Result<(), Error> {
        self.put_raw(key, value.as_bytes())
    }

    pub fn put_raw(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        self.push(Op::new(key, 0, Some(Treeobj::val(data.to_vec())))?)
    }

    pub fn append(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        self.push(Op::new(key, OP_APPEND, Some(Treeobj::val(data.to_vec())))?)
    }

    /// Assign an arbitrary (validated) tree object to a key.
    pub fn put_treeobj(&mut self, key: &str, obj: Treeobj) -> Result<(), Error> {
        obj.validate()?;
        self.push(Op::new(key, 0, Some(obj))?)
    }

    pub fn mkdir(&mut self, key: &str) -> Result<(), Error> {
        self.push(Op::new(key, 0, Some(Treeobj::dir()))?)
    }

    pub fn unlink(&mut self, key: &str) -> Result<(), Error> {
        self.push(Op::new(key, 0, None)?)
    }

    pub fn symlink(
        &mut self,
        key: &str,
        namespace: Option<&str>,
        target: &str,
    ) -> Result<(), Error> {
        self.push(Op::new(key, 0, Some(Treeobj::symlink(namespace, target)?))?)
    }

    /// Combine runs of appends to the same key into single appends. Fails
    /// with invalid-input when a key mixes appends with other operations;
    /// see [`compact`] for the rules.
    pub fn compact(&mut self) -> Result<(), Error> {
        self.ops = compact::compact_ops(&self.ops)?;
        Ok(())
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push(&mut self, op: Op) -> Result<(), Error> {
        self.ops.push(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builder_produces_ordered_ops() {
        let mut txn = TxnBuilder::new();
        txn.put("a.b", "1").unwrap();
        txn.append("log", b"entry").unwrap();
        txn.mkdir("dir").unwrap();
        txn.unlink("gone").unwrap();
        txn.symlink("link", None, "a.b").unwrap();

        let ops = txn.ops();
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[0].key, "a.b");
        assert!(!ops[0].is_append());
        assert!(ops[1].is_append());
        assert!(ops[2].dirent.as_ref().unwrap().is_dir());
        assert!(ops[3].is_unlink());
        assert!(ops[4].dirent.as_ref().unwrap().is_symlink());
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut txn = TxnBuilder::new();
        assert_matches!(txn.put("", "x"), Err(Error::InvalidKey(_)));
    }

    #[test]
    fn put_treeobj_validates() {
        let mut txn = TxnBuilder::new();
        assert_matches!(
            txn.put_treeobj("k", Treeobj::Valref(vec![])),
            Err(Error::InvalidInput(_))
        );
    }

    #[test]
    fn op_wire_form() {
        let op = Op::new("a", 0, Some(Treeobj::val(b"hi".to_vec()))).unwrap();
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(
            json,
            r#"{"key":"a","flags":0,"dirent":{"data":"aGk=","type":"val","ver":1}}"#
        );
        let back: Op = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);

        let unlink = Op::new("a", 0, None).unwrap();
        let json = serde_json::to_string(&unlink).unwrap();
        assert_eq!(json, r#"{"key":"a","flags":0,"dirent":null}"#);
        let back: Op = serde_json::from_str(&json).unwrap();
        assert!(back.is_unlink());
    }

    #[test]
    fn op_rejects_unknown_flag_bits() {
        assert_matches!(
            Op::new("a", 0x80, Some(Treeobj::val(vec![]))),
            Err(Error::InvalidInput(_))
        );
    }
}
