//! Flag words carried on operations, commits and lookups.

use crate::error::Error;

/// Per-operation flags
pub const OP_APPEND: u32 = 1;

/// Transaction-level flags
pub const COMMIT_NO_MERGE: u32 = 1;
/// Flush and checkpoint before reporting success. Implies `NO_MERGE`.
pub const COMMIT_SYNC: u32 = 2;

/// Internal flags, not accepted over the wire
pub const INTERNAL_NO_PUBLISH: u32 = 1;

/// Lookup flags
pub const LOOKUP_TREEOBJ: u32 = 1;
pub const LOOKUP_READDIR: u32 = 2;
pub const LOOKUP_READLINK: u32 = 4;

pub fn validate(flags: u32, allowed: u32) -> Result<(), Error> {
    if flags & !allowed != 0 {
        return Err(Error::InvalidInput("unknown flag bits"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_rejected() {
        assert!(validate(OP_APPEND, OP_APPEND).is_ok());
        assert!(validate(0, 0).is_ok());
        assert!(validate(4, OP_APPEND).is_err());
        assert!(validate(COMMIT_NO_MERGE | COMMIT_SYNC, COMMIT_NO_MERGE | COMMIT_SYNC).is_ok());
        assert!(validate(8, COMMIT_NO_MERGE | COMMIT_SYNC).is_err());
    }
}
