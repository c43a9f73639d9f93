//! Wire codec for tree objects.
//!
//! Encoding is canonical JSON: compact separators and lexicographically
//! ordered keys, both at the record level (`data`, `type`, `ver`) and
//! inside `dir`/`symlink` data. Two structurally equal tree objects always
//! produce byte-identical encodings, and therefore the same blobref.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use copse_blobref::Blobref;
use serde::{de, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{
    error::TreeobjError,
    treeobj::{Treeobj, TREEOBJ_VERSION},
};

impl Serialize for Treeobj {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        match self {
            Treeobj::Val(data) => map.serialize_entry("data", &BASE64.encode(data))?,
            Treeobj::Valref(refs) | Treeobj::Dirref(refs) => {
                map.serialize_entry("data", refs)?
            }
            Treeobj::Dir(entries) => map.serialize_entry("data", entries)?,
            Treeobj::Symlink { namespace, target } => {
                // serde_json's Map keeps keys sorted
                let mut data = Map::new();
                if let Some(ns) = namespace {
                    data.insert("namespace".to_string(), Value::String(ns.clone()));
                }
                data.insert("target".to_string(), Value::String(target.clone()));
                map.serialize_entry("data", &data)?;
            }
        }
        map.serialize_entry("type", self.type_str())?;
        map.serialize_entry("ver", &TREEOBJ_VERSION)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Treeobj {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Treeobj::from_value(&value).map_err(de::Error::custom)
    }
}

impl Treeobj {
    /// Canonical JSON encoding.
    pub fn encode(&self) -> Result<String, TreeobjError> {
        serde_json::to_string(self)
            .map_err(|_| TreeobjError::BadEncoding("treeobj failed to serialize"))
    }

    /// Parse and validate a canonical (or merely well-formed) encoding.
    /// Everything that can go wrong here is a bad-encoding error, distinct
    /// from the invalid-input errors of the constructors and mutators.
    pub fn decode(buf: &str) -> Result<Self, TreeobjError> {
        Self::decode_bytes(buf.as_bytes())
    }

    pub fn decode_bytes(buf: &[u8]) -> Result<Self, TreeobjError> {
        let value: Value = serde_json::from_slice(buf)
            .map_err(|_| TreeobjError::BadEncoding("not valid JSON"))?;
        let obj = Treeobj::from_value(&value)?;
        obj.validate()
            .map_err(|_| TreeobjError::BadEncoding("schema validation failed"))?;
        Ok(obj)
    }

    fn from_value(value: &Value) -> Result<Self, TreeobjError> {
        let record = value
            .as_object()
            .ok_or(TreeobjError::BadEncoding("treeobj is not an object"))?;
        if record.len() != 3 {
            return Err(TreeobjError::BadEncoding("unexpected record keys"));
        }
        let ver = record
            .get("ver")
            .and_then(Value::as_u64)
            .ok_or(TreeobjError::BadEncoding("missing ver"))?;
        if ver != u64::from(TREEOBJ_VERSION) {
            return Err(TreeobjError::BadEncoding("unsupported version"));
        }
        let typ = record
            .get("type")
            .and_then(Value::as_str)
            .ok_or(TreeobjError::BadEncoding("missing type"))?;
        let data = record
            .get("data")
            .ok_or(TreeobjError::BadEncoding("missing data"))?;

        match typ {
            "val" => {
                let xdata = data
                    .as_str()
                    .ok_or(TreeobjError::BadEncoding("val data is not a string"))?;
                let bytes = BASE64
                    .decode(xdata)
                    .map_err(|_| TreeobjError::BadEncoding("val data is not base64"))?;
                Ok(Treeobj::Val(bytes))
            }
            "valref" => Ok(Treeobj::Valref(blobref_array(data)?)),
            "dirref" => Ok(Treeobj::Dirref(blobref_array(data)?)),
            "dir" => {
                let entries = data
                    .as_object()
                    .ok_or(TreeobjError::BadEncoding("dir data is not an object"))?;
                let mut dir = Treeobj::dir();
                for (name, child) in entries {
                    let child = Treeobj::from_value(child)?;
                    dir.insert_entry_unchecked(name, child).map_err(|_| {
                        TreeobjError::BadEncoding("bad directory entry name")
                    })?;
                }
                Ok(dir)
            }
            "symlink" => {
                let link = data
                    .as_object()
                    .ok_or(TreeobjError::BadEncoding("symlink data is not an object"))?;
                let target = link
                    .get("target")
                    .and_then(Value::as_str)
                    .ok_or(TreeobjError::BadEncoding("symlink target missing"))?;
                let namespace = match link.get("namespace") {
                    None => None,
                    Some(ns) => Some(
                        ns.as_str()
                            .ok_or(TreeobjError::BadEncoding(
                                "symlink namespace is not a string",
                            ))?
                            .to_string(),
                    ),
                };
                Ok(Treeobj::Symlink {
                    namespace,
                    target: target.to_string(),
                })
            }
            _ => Err(TreeobjError::BadEncoding("unknown treeobj type")),
        }
    }
}

fn blobref_array(data: &Value) -> Result<Vec<Blobref>, TreeobjError> {
    let array = data
        .as_array()
        .ok_or(TreeobjError::BadEncoding("blobref data is not an array"))?;
    let mut refs = Vec::with_capacity(array.len());
    for element in array {
        let s = element
            .as_str()
            .ok_or(TreeobjError::BadEncoding("blobref is not a string"))?;
        refs.push(
            Blobref::parse(s).map_err(|_| TreeobjError::BadEncoding("bad blobref"))?,
        );
    }
    Ok(refs)
}
