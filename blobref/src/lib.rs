//! Content-addressed blob identifiers.
//!
//! A blobref is the canonical name of a blob held by the content store: a
//! short ASCII string `"<algo>-<hex>"`, e.g.
//! `sha1-a9993e364706816aba3e25717850c26c9cd0d89d`. Everything that refers
//! to stored data (dirrefs, valrefs, root references, checkpoints) does so
//! through this type.

mod error;

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as _, Sha1};
use sha2::Sha256;

pub use crate::error::BlobrefError;

/// Upper bound on the byte length of any valid blobref string. Also used
/// by callers as the inline-value threshold when deciding whether a value
/// is worth externalizing into its own blob.
pub const BLOBREF_MAX_STRING_SIZE: usize = 72;

/// Digest algorithms a blobref may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    Sha1,
    Sha256,
    Blake3,
}

impl HashAlgo {
    pub fn from_name(name: &str) -> Result<Self, BlobrefError> {
        match name {
            "sha1" => Ok(HashAlgo::Sha1),
            "sha256" => Ok(HashAlgo::Sha256),
            "blake3" => Ok(HashAlgo::Blake3),
            other => Err(BlobrefError::UnknownHash(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Blake3 => "blake3",
        }
    }

    /// Digest size in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha256 => 32,
            HashAlgo::Blake3 => 32,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgo::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgo::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgo::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgo {
    type Err = BlobrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgo::from_name(s)
    }
}

/// A validated blobref. Immutable once constructed; cheap to clone
/// relative to the blobs it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Blobref {
    repr: String,
}

impl Blobref {
    /// Hash `data` with `algo` and format the resulting blobref.
    pub fn hash(algo: HashAlgo, data: &[u8]) -> Self {
        let digest = algo.digest(data);
        Blobref {
            repr: format!("{}-{}", algo.name(), hex::encode(digest)),
        }
    }

    /// Parse and validate a blobref string: known algorithm token, a single
    /// `-` separator, lowercase hex of exactly the algorithm's digest
    /// length, nothing trailing.
    pub fn parse(s: &str) -> Result<Self, BlobrefError> {
        if s.len() > BLOBREF_MAX_STRING_SIZE {
            return Err(BlobrefError::Malformed("string too long"));
        }
        let (name, hexdigits) = s
            .split_once('-')
            .ok_or(BlobrefError::Malformed("missing '-' separator"))?;
        let algo = HashAlgo::from_name(name)?;
        if hexdigits.len() != algo.digest_len() * 2 {
            return Err(BlobrefError::Malformed("digest length mismatch"));
        }
        if !hexdigits
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(BlobrefError::Malformed("digest is not lowercase hex"));
        }
        Ok(Blobref {
            repr: s.to_string(),
        })
    }

    /// Validate without constructing.
    pub fn validate(s: &str) -> Result<(), BlobrefError> {
        Blobref::parse(s).map(|_| ())
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }

    /// The algorithm named by this blobref.
    pub fn algo(&self) -> HashAlgo {
        // repr was validated at construction, the token is always known
        let name = self.repr.split_once('-').map(|(n, _)| n).unwrap_or("");
        HashAlgo::from_name(name).expect("validated blobref carries a known algorithm")
    }
}

impl fmt::Display for Blobref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for Blobref {
    type Err = BlobrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Blobref::parse(s)
    }
}

impl Serialize for Blobref {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr)
    }
}

impl<'de> Deserialize<'de> for Blobref {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Blobref::parse(&s).map_err(de::Error::custom)
    }
}
