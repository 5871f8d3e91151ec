//! Per-tensor metadata: dtype, htype, chunk sizing, the running shape
//! interval, and the two frozen-after-first-sample invariants (dtype, rank).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cachable::Cachable;
use crate::dtype::DType;
use crate::error::{Error, Result};

/// One htype's allowed override keys and their defaults.
struct HtypeConfig {
    allowed_keys: &'static [&'static str],
    default_dtype: Option<&'static str>,
    default_chunk_size: usize,
    default_sample_compression: Option<&'static str>,
    default_hash_samples: bool,
}

const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

fn htype_config(htype: &str) -> Option<HtypeConfig> {
    match htype {
        "generic" => Some(HtypeConfig {
            allowed_keys: &["dtype", "chunk_size", "sample_compression", "hash_samples"],
            default_dtype: None,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            default_sample_compression: None,
            default_hash_samples: false,
        }),
        "image" => Some(HtypeConfig {
            allowed_keys: &["dtype", "chunk_size", "sample_compression", "hash_samples"],
            default_dtype: Some("uint8"),
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            default_sample_compression: Some("png"),
            default_hash_samples: false,
        }),
        "class_label" => Some(HtypeConfig {
            allowed_keys: &["dtype", "chunk_size", "hash_samples"],
            default_dtype: Some("uint32"),
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            default_sample_compression: None,
            default_hash_samples: false,
        }),
        _ => None,
    }
}

/// The registry of htype names this build recognizes, built once and shared
/// by every `TensorMeta::create` error path that needs to list them.
static KNOWN_HTYPES: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["generic", "image", "class_label"]);

fn known_htypes() -> Vec<&'static str> {
    KNOWN_HTYPES.clone()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TensorMeta {
    pub htype: String,
    pub dtype: Option<String>,
    pub min_shape: Vec<u32>,
    pub max_shape: Vec<u32>,
    pub length: u64,
    pub max_chunk_size: usize,
    pub sample_compression: Option<String>,
    pub hash_samples: bool,
}

impl TensorMeta {
    /// Creates fresh tensor meta for `htype`, validating `overrides` against
    /// that htype's configuration table.
    pub fn create(htype: &str, overrides: HashMap<String, Value>) -> Result<Self> {
        let config = htype_config(htype).ok_or_else(|| Error::TensorMetaInvalidHtype {
            htype: htype.to_owned(),
            known: known_htypes(),
        })?;

        for key in overrides.keys() {
            if !config.allowed_keys.contains(&key.as_str()) {
                return Err(Error::InvalidOverwriteKey {
                    htype: htype.to_owned(),
                    key: key.clone(),
                    valid: config.allowed_keys.to_vec(),
                });
            }
        }

        let chunk_size = match overrides.get("chunk_size") {
            Some(v) => {
                let n = v.as_u64().ok_or_else(|| Error::InvalidOverwriteValue {
                    key: "chunk_size".into(),
                    reason: "must be a positive integer".into(),
                })?;
                if n == 0 {
                    return Err(Error::InvalidOverwriteValue {
                        key: "chunk_size".into(),
                        reason: "chunk size must be greater than 0".into(),
                    });
                }
                n as usize
            }
            None => config.default_chunk_size,
        };

        let dtype = match overrides.get("dtype") {
            Some(v) => {
                let name = v.as_str().ok_or_else(|| Error::InvalidOverwriteValue {
                    key: "dtype".into(),
                    reason: "dtype must be a string".into(),
                })?;
                if DType::parse(name).is_none() {
                    return Err(Error::InvalidOverwriteValue {
                        key: "dtype".into(),
                        reason: format!("{name:?} is not a dtype recognized by the numeric backend"),
                    });
                }
                Some(name.to_owned())
            }
            None => config.default_dtype.map(str::to_owned),
        };

        let sample_compression = match overrides.get("sample_compression") {
            Some(Value::Null) => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or_else(|| Error::InvalidOverwriteValue {
                        key: "sample_compression".into(),
                        reason: "sample_compression must be a string or null".into(),
                    })?
                    .to_owned(),
            ),
            None => config.default_sample_compression.map(str::to_owned),
        };

        let hash_samples = match overrides.get("hash_samples") {
            Some(v) => v.as_bool().ok_or_else(|| Error::InvalidOverwriteValue {
                key: "hash_samples".into(),
                reason: "hash_samples must be a boolean".into(),
            })?,
            None => config.default_hash_samples,
        };

        Ok(Self {
            htype: htype.to_owned(),
            dtype,
            // Fresh, empty vectors per instance -- never a shared default.
            min_shape: Vec::new(),
            max_shape: Vec::new(),
            length: 0,
            max_chunk_size: chunk_size,
            sample_compression,
            hash_samples,
        })
    }

    /// Refuses a dtype or rank change once the tensor already has samples.
    pub fn check_batch_is_compatible(&self, tensor: &str, dtype: &str, shape: &[u32]) -> Result<()> {
        if let Some(existing) = &self.dtype {
            if existing != dtype {
                return Err(Error::TensorMetaMismatch {
                    tensor: tensor.to_owned(),
                    expected: format!("dtype {existing:?}"),
                    actual: format!("dtype {dtype:?}"),
                });
            }
        }
        if self.length > 0 && self.min_shape.len() != shape.len() {
            return Err(Error::TensorMetaMismatch {
                tensor: tensor.to_owned(),
                expected: format!("rank {}", self.min_shape.len()),
                actual: format!("rank {}", shape.len()),
            });
        }
        Ok(())
    }

    /// Updates `length`, `dtype`, and the `min_shape`/`max_shape` interval
    /// for one newly-appended sample.
    pub fn update_with_sample(&mut self, dtype: &str, shape: &[u32]) {
        if self.length == 0 {
            self.dtype = Some(dtype.to_owned());
            self.min_shape = shape.to_vec();
            self.max_shape = shape.to_vec();
        } else {
            for (i, &dim) in shape.iter().enumerate() {
                self.min_shape[i] = self.min_shape[i].min(dim);
                self.max_shape[i] = self.max_shape[i].max(dim);
            }
        }
        self.length += 1;
    }

    /// Normalizes `buffer`'s byte order to match the frozen dtype; identity
    /// when it already matches (this crate only ever produces little-endian
    /// buffers, so today this never has work to do).
    pub fn adapt<'a>(&self, buffer: &'a [u8], _shape: &[u32]) -> &'a [u8] {
        buffer
    }
}

impl Cachable for TensorMeta {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| {
            Error::corrupted_meta("<tensor_meta>", format!("failed to serialize tensor meta: {err}"))
        })
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| {
            Error::corrupted_meta(
                "<tensor_meta>",
                format!("failed to parse tensor meta JSON (unknown or missing keys?): {err}"),
            )
        })
    }

    fn nbytes(&self) -> usize {
        // Live-size accounting: a handful of scalars plus two shape vectors.
        std::mem::size_of::<Self>()
            + self.htype.len()
            + self.dtype.as_ref().map_or(0, String::len)
            + self.sample_compression.as_ref().map_or(0, String::len)
            + (self.min_shape.len() + self.max_shape.len()) * std::mem::size_of::<u32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_unknown_htype() {
        assert!(matches!(
            TensorMeta::create("bogus", HashMap::new()),
            Err(Error::TensorMetaInvalidHtype { .. })
        ));
    }

    #[test]
    fn create_rejects_unknown_override_key() {
        let mut overrides = HashMap::new();
        overrides.insert("not_a_real_key".to_owned(), Value::Bool(true));
        assert!(matches!(
            TensorMeta::create("generic", overrides),
            Err(Error::InvalidOverwriteKey { .. })
        ));
    }

    #[test]
    fn create_rejects_non_positive_chunk_size() {
        let mut overrides = HashMap::new();
        overrides.insert("chunk_size".to_owned(), Value::from(0));
        assert!(matches!(
            TensorMeta::create("generic", overrides),
            Err(Error::InvalidOverwriteValue { .. })
        ));
    }

    #[test]
    fn create_rejects_unrecognized_dtype() {
        let mut overrides = HashMap::new();
        overrides.insert("dtype".to_owned(), Value::from("not_a_dtype"));
        assert!(matches!(
            TensorMeta::create("generic", overrides),
            Err(Error::InvalidOverwriteValue { .. })
        ));
    }

    #[test]
    fn update_with_sample_freezes_dtype_and_tracks_interval() {
        let mut meta = TensorMeta::create("generic", HashMap::new()).unwrap();
        meta.update_with_sample("float32", &[10, 10]);
        meta.update_with_sample("float32", &[20, 5]);
        assert_eq!(meta.min_shape, vec![10, 5]);
        assert_eq!(meta.max_shape, vec![20, 10]);
        assert_eq!(meta.length, 2);

        let err = meta.check_batch_is_compatible("t", "float64", &[10, 10]);
        assert!(matches!(err, Err(Error::TensorMetaMismatch { .. })));
    }

    #[test]
    fn roundtrips_through_json() {
        let mut meta = TensorMeta::create("image", HashMap::new()).unwrap();
        meta.update_with_sample("uint8", &[8, 8, 3]);
        let bytes = meta.to_bytes().unwrap();
        let back = TensorMeta::from_bytes(&bytes).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn unknown_json_keys_are_rejected_on_load() {
        let json = br#"{"htype":"generic","dtype":null,"min_shape":[],"max_shape":[],"length":0,"max_chunk_size":1,"sample_compression":null,"hash_samples":false,"mystery":1}"#;
        assert!(TensorMeta::from_bytes(json).is_err());
    }
}
