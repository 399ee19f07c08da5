//! Cache key types and construction.
//!
//! This module provides types for building and representing cache keys:
//!
//! - [`CacheKey`] - The complete cache key with version, namespace and digest
//! - [`KeyValue`] - A scalar parameter value that takes part in a key
//! - [`CacheKeyBuilder`] - Builder accumulating parameters for one command
//!
//! ## Key Structure
//!
//! Cache keys have three components:
//!
//! 1. **Version** - Schema version; bumping it invalidates every stored entry
//! 2. **Namespace** - The command (or other logical group) the key belongs to
//! 3. **Digest** - SHA-256 of the canonical JSON encoding of the parameters
//!
//! ## Format
//!
//! When rendered as a string, keys follow this format:
//! `v{version}:{namespace}:{digest}`
//!
//! ## Canonical encoding
//!
//! Parameters are filtered (absent values dropped) and sorted by name before
//! encoding, so insertion order and missing optional arguments never change the
//! key:
//!
//! ```
//! use tintbox_core::{CacheKey, CacheKeyBuilder, KeyValue};
//!
//! let a = CacheKeyBuilder::new("match")
//!     .param("hex", "#ff8800")
//!     .param("limit", 5)
//!     .param_opt("palette", None::<&str>)
//!     .build();
//! let b = CacheKeyBuilder::new("match")
//!     .param("limit", 5)
//!     .param("hex", "#ff8800")
//!     .build();
//! assert_eq!(a, b);
//! assert!(a.to_string().starts_with("v1:match:"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Default schema version used by [`CacheKeyBuilder`].
pub const DEFAULT_KEY_VERSION: u32 = 1;

/// Inner structure containing the actual cache key data.
/// Wrapped in Arc for cheap cloning.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CacheKeyInner {
    version: u32,
    namespace: SmolStr,
    digest: SmolStr,
}

/// A cache key identifying a cached entry.
///
/// `CacheKey` wraps its data in [`Arc`], making `clone()` an O(1) operation
/// that only increments a reference count. Keys are passed into background
/// tasks and coalescer registries, so they are cloned often.
#[derive(Clone, Debug)]
pub struct CacheKey {
    inner: Arc<CacheKeyInner>,
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: same Arc pointer
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{}:{}:{}",
            self.inner.version, self.inner.namespace, self.inner.digest
        )
    }
}

impl CacheKey {
    /// Creates a key from already computed components.
    ///
    /// Prefer [`CacheKeyBuilder`] or [`CacheKey::from_params`]; this constructor
    /// exists for keys whose digest is computed elsewhere (e.g. keys read back
    /// from an administrative tool).
    pub fn new(version: u32, namespace: impl Into<SmolStr>, digest: impl Into<SmolStr>) -> Self {
        CacheKey {
            inner: Arc::new(CacheKeyInner {
                version,
                namespace: namespace.into(),
                digest: digest.into(),
            }),
        }
    }

    /// Builds a key from a parameter iterator.
    ///
    /// `None` values are dropped before hashing.
    pub fn from_params<I, K, V>(namespace: impl Into<SmolStr>, version: u32, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<SmolStr>,
        V: Into<KeyValue>,
    {
        let mut builder = CacheKeyBuilder::new(namespace).version(version);
        for (name, value) in params {
            builder = builder.param_opt(name, value);
        }
        builder.build()
    }

    /// Returns the schema version of the key.
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// Returns the namespace (command name) of the key.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Returns the hex-encoded parameter digest.
    pub fn digest(&self) -> &str {
        &self.inner.digest
    }

    /// Returns the estimated memory usage of this key in bytes.
    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + std::mem::size_of::<CacheKeyInner>()
            + self.inner.namespace.len()
            + self.inner.digest.len()
    }
}

/// A scalar value taking part in a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// String value.
    Str(SmolStr),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
}

impl KeyValue {
    fn to_json(&self) -> serde_json::Value {
        match self {
            KeyValue::Str(s) => serde_json::Value::String(s.to_string()),
            KeyValue::Int(i) => serde_json::Value::from(*i),
            KeyValue::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(number) => serde_json::Value::Number(number),
                // JSON has no NaN or infinities. An object keeps them apart
                // from each other and from every string parameter.
                None => {
                    let mut tagged = serde_json::Map::new();
                    tagged.insert("f64".to_owned(), serde_json::Value::String(f.to_string()));
                    serde_json::Value::Object(tagged)
                }
            },
            KeyValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Str(SmolStr::new(value))
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Str(SmolStr::from(value))
    }
}

impl From<SmolStr> for KeyValue {
    fn from(value: SmolStr) -> Self {
        KeyValue::Str(value)
    }
}

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        KeyValue::Bool(value)
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        KeyValue::Float(value)
    }
}

macro_rules! int_key_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyValue {
                fn from(value: $ty) -> Self {
                    KeyValue::Int(i64::from(value))
                }
            }
        )*
    };
}

int_key_value!(i8, i16, i32, i64, u8, u16, u32);

/// Builder for [`CacheKey`].
///
/// Parameters are kept sorted by name; setting the same name twice keeps the
/// last value.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: SmolStr,
    version: u32,
    params: BTreeMap<SmolStr, KeyValue>,
}

impl CacheKeyBuilder {
    /// Creates a builder for the given namespace with [`DEFAULT_KEY_VERSION`].
    pub fn new(namespace: impl Into<SmolStr>) -> Self {
        Self {
            namespace: namespace.into(),
            version: DEFAULT_KEY_VERSION,
            params: BTreeMap::new(),
        }
    }

    /// Sets the schema version.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Adds a parameter.
    pub fn param(mut self, name: impl Into<SmolStr>, value: impl Into<KeyValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Adds an optional parameter. Absent values are ignored (and remove an
    /// earlier value under the same name).
    pub fn param_opt<V>(mut self, name: impl Into<SmolStr>, value: Option<V>) -> Self
    where
        V: Into<KeyValue>,
    {
        let name = name.into();
        match value {
            Some(value) => {
                self.params.insert(name, value.into());
            }
            None => {
                self.params.remove(&name);
            }
        }
        self
    }

    /// Returns the canonical JSON encoding of the retained parameters.
    pub fn canonical(&self) -> String {
        let map: BTreeMap<&str, serde_json::Value> = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_json()))
            .collect();
        // A BTreeMap of strings to JSON values cannot fail to serialize.
        serde_json::to_string(&map).unwrap_or_default()
    }

    /// Finishes the key.
    pub fn build(self) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let digest = hex::encode(hasher.finalize());
        CacheKey::new(self.version, self.namespace, digest)
    }
}
