use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Header names understood by the dispatch loop and the execution bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaderName {
    StateId,
    Delay,
    EventType,
    TargetType,
    EmittedBy,
    EmittedAt,
    Provenance,
    TargetOperations,
    SourceOperations,
    Meta,
    CorrelationId,
}

impl HeaderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderName::StateId => "State-Id",
            HeaderName::Delay => "Delay",
            HeaderName::EventType => "Event-Type",
            HeaderName::TargetType => "Target-Type",
            HeaderName::EmittedBy => "Emitted-By",
            HeaderName::EmittedAt => "Emitted-At",
            HeaderName::Provenance => "Provenance",
            HeaderName::TargetOperations => "Target-Operations",
            HeaderName::SourceOperations => "Source-Operations",
            HeaderName::Meta => "P-Meta",
            HeaderName::CorrelationId => "Correlation-Id",
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for HeaderName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Ordered multimap of message headers.
///
/// Names are matched case-insensitively, the way stream and HTTP headers
/// are looked up on both sides of the bridge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_key(&self, name: &str) -> Option<String> {
        self.0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    /// First non-empty value for `name`.
    pub fn get_non_empty(&self, name: impl AsRef<str>) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    pub fn get_all(&self, name: impl AsRef<str>) -> &[String] {
        let name = name.as_ref();
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// Replace all values of `name` with `value`.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let key = self.find_key(name).unwrap_or_else(|| name.to_string());
        self.0.insert(key, vec![value.into()]);
    }

    /// Add `value` to the values of `name`.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let key = self.find_key(name).unwrap_or_else(|| name.to_string());
        self.0.entry(key).or_default().push(value.into());
    }

    pub fn remove(&mut self, name: impl AsRef<str>) -> Option<Vec<String>> {
        let key = self.find_key(name.as_ref())?;
        self.0.remove(&key)
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.find_key(name.as_ref()).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Merge every value of `other` into `self`.
    pub fn extend(&mut self, other: &Headers) {
        for (k, v) in other.iter() {
            self.append(k, v);
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}
