use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

/// Ordered, immutable sequence of JSON segments naming a cacheable query.
///
/// Equality and hashing use the serialized segment list. Object segments are
/// key-sorted by `serde_json`, so filter objects compare by content.
#[derive(Clone)]
pub struct QueryKey {
    segments: Arc<[Value]>,
    serialized: Arc<str>,
}

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Value>,
    {
        let segments: Vec<Value> = segments.into_iter().map(Into::into).collect();
        Self::from_vec(segments)
    }

    fn from_vec(segments: Vec<Value>) -> Self {
        let serialized = Value::Array(segments.clone()).to_string();
        Self {
            segments: segments.into(),
            serialized: serialized.into(),
        }
    }

    pub fn segments(&self) -> &[Value] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new key with `segment` appended.
    pub fn child(&self, segment: impl Into<Value>) -> Self {
        let mut segments = self.segments.to_vec();
        segments.push(segment.into());
        Self::from_vec(segments)
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.segments.first().and_then(Value::as_str)
    }

    /// Stable circuit-breaker key: the leading string segments (at most two)
    /// joined with `/`, e.g. `["notifications","list",…]` → `notifications/list`.
    pub fn endpoint(&self) -> String {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map_while(Value::as_str)
            .take(2)
            .collect();
        if parts.is_empty() {
            crate::classify::UNKNOWN_ENDPOINT.to_string()
        } else {
            parts.join("/")
        }
    }

    /// Dotted label used for performance samples.
    pub fn sample_key(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn serialized(&self) -> &str {
        &self.serialized
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.serialized == other.serialized
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl PartialOrd for QueryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.serialized)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl From<&str> for QueryKey {
    fn from(value: &str) -> Self {
        QueryKey::new([value])
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(value: Vec<Value>) -> Self {
        QueryKey::from_vec(value)
    }
}
