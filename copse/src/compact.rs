//! Transaction compaction.
//!
//! Log-like keys can accumulate many appends in one transaction, and every
//! append becomes another blobref in the key's valref array. Compaction
//! combines runs of appends to the same key into a single append before
//! commit, so an append of `"A"` followed by an append of `"B"` stores one
//! blob `"AB"`.
//!
//! A key that mixes appends with any other operation in the same
//! transaction cannot be compacted: an overwrite between two appends must
//! not be reordered, so the whole transaction is refused.

use std::collections::HashMap;

use copse_treeobj::Treeobj;

use crate::{error::Error, flags::OP_APPEND, ops::Op};

struct CompactKey {
    /// Position of the surviving append in the rewritten op list
    index: usize,
    appends: Vec<Vec<u8>>,
    total_len: usize,
}

pub(crate) fn compact_ops(ops: &[Op]) -> Result<Vec<Op>, Error> {
    if ops.len() < 2 {
        return Ok(ops.to_vec());
    }

    let mut ops_new: Vec<Op> = Vec::with_capacity(ops.len());
    let mut append_keys: HashMap<String, CompactKey> = HashMap::new();

    for op in ops {
        match append_keys.get_mut(&op.key) {
            Some(ck) => {
                if op.flags != OP_APPEND {
                    return Err(Error::InvalidInput(
                        "append and non-append operations mixed on one key",
                    ));
                }
                let data = append_val_bytes(op)?;
                ck.total_len += data.len();
                ck.appends.push(data);
            }
            None => {
                if op.flags == OP_APPEND {
                    let data = append_val_bytes(op)?;
                    ops_new.push(op.clone());
                    append_keys.insert(
                        op.key.clone(),
                        CompactKey {
                            index: ops_new.len() - 1,
                            total_len: data.len(),
                            appends: vec![data],
                        },
                    );
                } else {
                    ops_new.push(op.clone());
                }
            }
        }
    }

    for ck in append_keys.values() {
        // a single append is just the original; all-zero-length appends
        // need no rewrite either
        if ck.appends.len() == 1 || ck.total_len == 0 {
            continue;
        }
        let mut buf = Vec::with_capacity(ck.total_len);
        for data in &ck.appends {
            buf.extend_from_slice(data);
        }
        let dst = &ops_new[ck.index];
        ops_new[ck.index] = Op {
            key: dst.key.clone(),
            flags: dst.flags,
            dirent: Some(Treeobj::val(buf)),
        };
    }

    Ok(ops_new)
}

fn append_val_bytes(op: &Op) -> Result<Vec<u8>, Error> {
    op.dirent
        .as_ref()
        .and_then(|dirent| dirent.val_bytes().ok())
        .map(<[u8]>::to_vec)
        .ok_or(Error::InvalidInput("append operand is not a val"))
}
