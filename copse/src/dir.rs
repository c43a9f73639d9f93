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

//! Client-side directory snapshots.
//!
//! A [`KvsDir`] is what a readdir lookup hands back: a materialized
//! directory object together with the key it was found under, so entry
//! names can be turned back into full keys for further lookups. It is a
//! snapshot; later commits do not change it.

use copse_treeobj::Treeobj;

use crate::{error::Error, key};

#[derive(Debug, Clone)]
pub struct KvsDir {
    key: String,
    dirobj: Treeobj,
}

impl KvsDir {
    pub fn new(dir_key: &str, dirobj: Treeobj) -> Result<Self, Error> {
        let dir_key = key::normalize(dir_key)?;
        if !dirobj.is_dir() {
            return Err(Error::NotDirectory("not a directory object"));
        }
        Ok(KvsDir {
            key: dir_key,
            dirobj,
        })
    }

    /// The key this directory was looked up under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.dirobj.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        // the object was checked at construction
        self.dirobj
            .dir_entries()
            .into_iter()
            .flat_map(|entries| entries.keys())
            .map(String::as_str)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn is_dir(&self, name: &str) -> bool {
        self.entry(name)
            .is_some_and(|obj| obj.is_dir() || obj.is_dirref())
    }

    pub fn is_symlink(&self, name: &str) -> bool {
        self.entry(name).is_some_and(Treeobj::is_symlink)
    }

    pub fn entry(&self, name: &str) -> Option<&Treeobj> {
        self.dirobj.entry(name).ok()
    }

    /// The full key of an entry, suitable for another lookup.
    pub fn key_at(&self, name: &str) -> String {
        if key::is_root(&self.key) {
            name.to_string()
        } else {
            format!("{}.{}", self.key, name)
        }
    }

    pub fn treeobj(&self) -> &Treeobj {
        &self.dirobj
    }
}
