//! Helpers
//! Accessors, mutators and schema validation for tree objects

use std::collections::BTreeMap;

use copse_blobref::Blobref;

use crate::{error::TreeobjError, treeobj::Treeobj};

impl Treeobj {
    pub fn is_val(&self) -> bool {
        matches!(self, Treeobj::Val(_))
    }

    pub fn is_valref(&self) -> bool {
        matches!(self, Treeobj::Valref(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Treeobj::Dir(_))
    }

    pub fn is_dirref(&self) -> bool {
        matches!(self, Treeobj::Dirref(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Treeobj::Symlink { .. })
    }

    /// Number of directly held things: entries for a dir, blobrefs for a
    /// valref/dirref, one for everything else.
    pub fn count(&self) -> usize {
        match self {
            Treeobj::Val(_) | Treeobj::Symlink { .. } => 1,
            Treeobj::Valref(refs) | Treeobj::Dirref(refs) => refs.len(),
            Treeobj::Dir(entries) => entries.len(),
        }
    }

    /// The bytes of an inline value
    pub fn val_bytes(&self) -> Result<&[u8], TreeobjError> {
        match self {
            Treeobj::Val(data) => Ok(data),
            _ => Err(TreeobjError::WrongType("expected a val")),
        }
    }

    /// The (namespace, target) pair of a symlink
    pub fn symlink_target(&self) -> Result<(Option<&str>, &str), TreeobjError> {
        match self {
            Treeobj::Symlink { namespace, target } => {
                Ok((namespace.as_deref(), target))
            }
            _ => Err(TreeobjError::WrongType("expected a symlink")),
        }
    }

    /// Directory entry lookup by name
    pub fn entry(&self, name: &str) -> Result<&Treeobj, TreeobjError> {
        self.dir_entries()?
            .get(name)
            .ok_or_else(|| TreeobjError::NoEntry(name.to_string()))
    }

    pub fn entry_mut(&mut self, name: &str) -> Result<&mut Treeobj, TreeobjError> {
        self.dir_entries_mut()?
            .get_mut(name)
            .ok_or_else(|| TreeobjError::NoEntry(name.to_string()))
    }

    pub fn dir_entries(&self) -> Result<&BTreeMap<String, Treeobj>, TreeobjError> {
        match self {
            Treeobj::Dir(entries) => Ok(entries),
            _ => Err(TreeobjError::WrongType("expected a dir")),
        }
    }

    pub fn dir_entries_mut(
        &mut self,
    ) -> Result<&mut BTreeMap<String, Treeobj>, TreeobjError> {
        match self {
            Treeobj::Dir(entries) => Ok(entries),
            _ => Err(TreeobjError::WrongType("expected a dir")),
        }
    }

    /// Blobref at `index` of a valref or dirref
    pub fn blobref(&self, index: usize) -> Result<&Blobref, TreeobjError> {
        self.blobrefs()?
            .get(index)
            .ok_or(TreeobjError::InvalidInput("blobref index out of range"))
    }

    pub fn blobrefs(&self) -> Result<&[Blobref], TreeobjError> {
        match self {
            Treeobj::Valref(refs) | Treeobj::Dirref(refs) => Ok(refs),
            _ => Err(TreeobjError::WrongType("expected a valref or dirref")),
        }
    }

    /// Insert `child` into a dir under `name`, validating the child first.
    /// An existing entry is overwritten.
    pub fn insert_entry(
        &mut self,
        name: &str,
        child: Treeobj,
    ) -> Result<(), TreeobjError> {
        child.validate()?;
        self.insert_entry_unchecked(name, child)
    }

    /// Insert without validating the child. For children just built from
    /// known-valid inputs or decoded out of the cache.
    pub fn insert_entry_unchecked(
        &mut self,
        name: &str,
        child: Treeobj,
    ) -> Result<(), TreeobjError> {
        if name.is_empty() || name.contains('.') {
            return Err(TreeobjError::InvalidInput("bad directory entry name"));
        }
        self.dir_entries_mut()?.insert(name.to_string(), child);
        Ok(())
    }

    /// Remove `name` from a dir. Absent entries report `NoEntry`.
    pub fn delete_entry(&mut self, name: &str) -> Result<(), TreeobjError> {
        self.dir_entries_mut()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TreeobjError::NoEntry(name.to_string()))
    }

    /// Append a blobref to a valref or dirref
    pub fn append_blobref(&mut self, blobref: Blobref) -> Result<(), TreeobjError> {
        match self {
            Treeobj::Valref(refs) | Treeobj::Dirref(refs) => {
                refs.push(blobref);
                Ok(())
            }
            _ => Err(TreeobjError::WrongType("expected a valref or dirref")),
        }
    }

    /// Recursive schema validation. Construction keeps most invalid states
    /// unrepresentable; what remains is emptiness rules and directory entry
    /// naming, which mutation through `insert_entry_unchecked` or literal
    /// construction could have broken.
    pub fn validate(&self) -> Result<(), TreeobjError> {
        match self {
            Treeobj::Val(_) => Ok(()),
            Treeobj::Valref(refs) | Treeobj::Dirref(refs) => {
                if refs.is_empty() {
                    return Err(TreeobjError::InvalidInput("empty blobref array"));
                }
                Ok(())
            }
            Treeobj::Dir(entries) => {
                for (name, child) in entries {
                    if name.is_empty() || name.contains('.') {
                        return Err(TreeobjError::InvalidInput(
                            "bad directory entry name",
                        ));
                    }
                    child.validate()?;
                }
                Ok(())
            }
            Treeobj::Symlink { namespace, target } => {
                if target.is_empty() {
                    return Err(TreeobjError::InvalidInput("symlink target is empty"));
                }
                if namespace.as_deref().is_some_and(str::is_empty) {
                    return Err(TreeobjError::InvalidInput(
                        "symlink namespace is empty",
                    ));
                }
                Ok(())
            }
        }
    }
}
