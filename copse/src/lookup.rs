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

//! Point lookups over a tree snapshot.
//!
//! The walk dereferences `dirref` and `valref` blobs through the cache
//! only; when a blob is not resident it reports the missing blobrefs and
//! the caller loads them before retrying, exactly like the commit path
//! stalls. Symlinks are followed by substituting their target for the
//! consumed prefix and restarting from the root.

use std::{cell::RefCell, rc::Rc};

use copse_blobref::Blobref;
use copse_cache::Cache;
use copse_treeobj::Treeobj;

use crate::{
    error::Error,
    flags::{self, LOOKUP_READDIR, LOOKUP_READLINK, LOOKUP_TREEOBJ},
    key, MAX_SYMLINK_HOPS,
};

/// What a lookup resolved to, shaped by the lookup flags.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    /// Raw bytes of a `val` or materialized `valref`
    Value(Vec<u8>),
    /// The tree object itself (`LOOKUP_TREEOBJ`)
    Object(Treeobj),
    /// A directory (`LOOKUP_READDIR`)
    Directory(Treeobj),
    /// The symlink record (`LOOKUP_READLINK`)
    Symlink {
        namespace: Option<String>,
        target: String,
    },
}

#[derive(Debug)]
pub enum LookupOutcome {
    Done(LookupResult),
    /// Blobs that must be loaded into the cache before retrying
    Missing(Vec<Blobref>),
}

enum WalkEnd {
    Done(LookupResult),
    Missing(Vec<Blobref>),
    Follow(String),
}

/// Look `key` up under the snapshot root `root`.
pub fn lookup_at(
    cache: &RefCell<Cache>,
    namespace: &str,
    root: &Treeobj,
    key: &str,
    lookup_flags: u32,
) -> Result<LookupOutcome, Error> {
    flags::validate(
        lookup_flags,
        LOOKUP_TREEOBJ | LOOKUP_READDIR | LOOKUP_READLINK,
    )?;
    let mut key = key::normalize(key)?;
    let mut hops = 0;
    loop {
        match walk(cache, namespace, root, &key, lookup_flags)? {
            WalkEnd::Done(result) => return Ok(LookupOutcome::Done(result)),
            WalkEnd::Missing(refs) => return Ok(LookupOutcome::Missing(refs)),
            WalkEnd::Follow(rewritten) => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(Error::SymlinkLimit);
                }
                key = key::normalize(&rewritten)?;
            }
        }
    }
}

fn walk(
    cache: &RefCell<Cache>,
    namespace: &str,
    cur: &Treeobj,
    name: &str,
    lookup_flags: u32,
) -> Result<WalkEnd, Error> {
    // a dirref root or intermediate resolves transparently
    if let Treeobj::Dirref(refs) = cur {
        return match deref_dir(cache, refs)? {
            Ok(dir) => walk(cache, namespace, &dir, name, lookup_flags),
            Err(missing) => Ok(WalkEnd::Missing(vec![missing])),
        };
    }

    if key::is_root(name) {
        return terminal(cache, namespace, cur, lookup_flags);
    }

    let (head, rest) = match name.split_once(key::SEPARATOR) {
        Some((head, rest)) => (head, Some(rest)),
        None => (name, None),
    };

    let entries = cur
        .dir_entries()
        .map_err(|_| Error::NotDirectory("path component is not a directory"))?;
    let entry = entries
        .get(head)
        .ok_or_else(|| Error::NoEntry(head.to_string()))?;

    match rest {
        None => terminal(cache, namespace, entry, lookup_flags),
        Some(rest) => match entry {
            Treeobj::Symlink { namespace: ns, target } => {
                check_namespace(namespace, ns.as_deref())?;
                Ok(WalkEnd::Follow(format!("{}.{}", target, rest)))
            }
            other => walk(cache, namespace, other, rest, lookup_flags),
        },
    }
}

fn terminal(
    cache: &RefCell<Cache>,
    namespace: &str,
    obj: &Treeobj,
    lookup_flags: u32,
) -> Result<WalkEnd, Error> {
    if lookup_flags & LOOKUP_READLINK != 0 {
        return match obj {
            Treeobj::Symlink { namespace, target } => {
                Ok(WalkEnd::Done(LookupResult::Symlink {
                    namespace: namespace.clone(),
                    target: target.clone(),
                }))
            }
            _ => Err(Error::InvalidInput("key does not name a symlink")),
        };
    }
    if lookup_flags & LOOKUP_TREEOBJ != 0 {
        return Ok(WalkEnd::Done(LookupResult::Object(obj.clone())));
    }
    // a terminal symlink is followed unless the caller asked for the
    // link itself
    if let Treeobj::Symlink { namespace: ns, target } = obj {
        check_namespace(namespace, ns.as_deref())?;
        return Ok(WalkEnd::Follow(target.clone()));
    }
    if lookup_flags & LOOKUP_READDIR != 0 {
        return match obj {
            Treeobj::Dir(_) => Ok(WalkEnd::Done(LookupResult::Directory(obj.clone()))),
            Treeobj::Dirref(refs) => match deref_dir(cache, refs)? {
                Ok(dir) => Ok(WalkEnd::Done(LookupResult::Directory((*dir).clone()))),
                Err(missing) => Ok(WalkEnd::Missing(vec![missing])),
            },
            _ => Err(Error::NotDirectory("key does not name a directory")),
        };
    }
    match obj {
        Treeobj::Val(data) => Ok(WalkEnd::Done(LookupResult::Value(data.clone()))),
        Treeobj::Valref(refs) => {
            let mut missing = Vec::new();
            let mut value = Vec::new();
            let cache = cache.borrow();
            for blobref in refs {
                match cache.lookup(blobref) {
                    Some(entry) if entry.is_valid() => {
                        if missing.is_empty() {
                            value.extend_from_slice(&entry.raw()?);
                        }
                    }
                    _ => missing.push(blobref.clone()),
                }
            }
            if missing.is_empty() {
                Ok(WalkEnd::Done(LookupResult::Value(value)))
            } else {
                Ok(WalkEnd::Missing(missing))
            }
        }
        Treeobj::Dir(_) | Treeobj::Dirref(_) => {
            Err(Error::IsDirectory("key names a directory"))
        }
        Treeobj::Symlink { .. } => {
            // handled above
            Err(Error::Unrecoverable("symlink fell through".to_string()))
        }
    }
}

/// Resolve a dirref through the cache: the shared dir object, or the
/// blobref to load.
fn deref_dir(
    cache: &RefCell<Cache>,
    refs: &[Blobref],
) -> Result<Result<Rc<Treeobj>, Blobref>, Error> {
    if refs.len() != 1 {
        tracing::error!(count = refs.len(), "invalid dirref count");
        return Err(Error::Unrecoverable(
            "dirref does not hold exactly one blobref".to_string(),
        ));
    }
    let blobref = &refs[0];
    let cache = cache.borrow();
    match cache.lookup(blobref) {
        Some(entry) if entry.is_valid() => {
            let obj = entry.treeobj()?;
            if !obj.is_dir() {
                return Err(Error::Unrecoverable(
                    "dirref blob is not a directory".to_string(),
                ));
            }
            Ok(Ok(obj))
        }
        _ => Ok(Err(blobref.clone())),
    }
}

fn check_namespace(current: &str, link: Option<&str>) -> Result<(), Error> {
    if link.is_some_and(|ns| ns != current) {
        return Err(Error::InvalidInput("symlink crosses namespaces"));
    }
    Ok(())
}
