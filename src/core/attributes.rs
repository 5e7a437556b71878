//! Canonicalized attribute sets.
//!
//! Measurements are partitioned by attribute set, so equality and hashing
//! must be stable regardless of the order keys were supplied in. The set
//! sorts keys, deduplicates with last-write-wins, and drops invalid
//! entries with a one-time warning per key.

use dashmap::DashSet;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Default nesting depth limit for array-valued attributes.
pub const DEFAULT_ATTRIBUTE_DEPTH: usize = 4;

/// A scalar or nested-array attribute value.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    /// UTF-8 string value
    Str(String),
    /// Boolean value
    Bool(bool),
    /// Signed 64-bit integer value
    I64(i64),
    /// 64-bit float value, compared and hashed by bit pattern
    F64(f64),
    /// Array of values, possibly nested
    Array(Vec<AttributeValue>),
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::I64(a), Self::I64(b)) => a.cmp(b),
            (Self::F64(a), Self::F64(b)) => a.total_cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            },
            Self::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            },
            Self::I64(i) => {
                2u8.hash(state);
                i.hash(state);
            },
            Self::F64(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            },
            Self::Array(values) => {
                4u8.hash(state);
                values.hash(state);
            },
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl<V: Into<AttributeValue>> From<Vec<V>> for AttributeValue {
    fn from(values: Vec<V>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl AttributeValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Str(_) => 0,
            Self::Bool(_) => 1,
            Self::I64(_) => 2,
            Self::F64(_) => 3,
            Self::Array(_) => 4,
        }
    }

    /// Nesting depth of this value: scalars are 1, arrays add a level.
    fn depth(&self) -> usize {
        match self {
            Self::Array(values) => 1 + values.iter().map(Self::depth).max().unwrap_or(0),
            _ => 1,
        }
    }

    /// Truncate nested arrays deeper than `limit` levels.
    fn clamp_depth(self, limit: usize) -> Self {
        match self {
            // Deeper content is dropped entirely.
            Self::Array(_) if limit <= 1 => Self::Array(Vec::new()),
            Self::Array(values) => Self::Array(
                values
                    .into_iter()
                    .map(|v| v.clamp_depth(limit - 1))
                    .collect(),
            ),
            scalar => scalar,
        }
    }
}

/// An ordered, deduplicated, hashable bag of key/value attributes.
///
/// Two sets built from the same pairs in any insertion order are equal and
/// hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AttributeSet {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeSet {
    /// The empty attribute set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a canonical set from key/value pairs using the default depth limit.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AttributeValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::with_depth_limit(pairs, DEFAULT_ATTRIBUTE_DEPTH)
    }

    /// Build a canonical set, truncating values nested deeper than `depth_limit`.
    pub fn with_depth_limit<K, V, I>(pairs: I, depth_limit: usize) -> Self
    where
        K: Into<String>,
        V: Into<AttributeValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entries: Vec<(String, AttributeValue)> = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            if key.is_empty() {
                warn_once("", "attribute with empty key dropped");
                continue;
            }
            let mut value = value.into();
            if value.depth() > depth_limit {
                warn_once(&key, "attribute value exceeds nesting depth limit, truncated");
                value = value.clamp_depth(depth_limit);
            }
            entries.push((key, value));
        }
        // Stable sort so the last write for a duplicate key survives dedup.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.reverse();
        entries.dedup_by(|a, b| a.0 == b.0);
        entries.reverse();
        Self { entries }
    }

    /// Iterate entries in canonical key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only entries whose key is in `keys`.
    pub fn retain_keys(&self, keys: &[String]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| keys.iter().any(|allow| allow == k))
                .cloned()
                .collect(),
        }
    }
}

fn warned_keys() -> &'static DashSet<String> {
    static KEYS: OnceLock<DashSet<String>> = OnceLock::new();
    KEYS.get_or_init(DashSet::new)
}

/// Emit a diagnostic for `key` at most once per process.
pub(crate) fn warn_once(key: &str, message: &str) {
    if warned_keys().insert(format!("{}:{}", message, key)) {
        tracing::warn!(key, "{}", message);
    }
}
