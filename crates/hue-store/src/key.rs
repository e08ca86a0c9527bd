//! Store key paths.

use serde::{Deserialize, Serialize};

/// A slash-separated key in the shared store.
///
/// Paths are normalized on construction: leading, trailing and repeated
/// separators are dropped, so `"/hue//locks/"` and `"hue/locks"` name the
/// same key. The empty path is the store root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct KeyPath(String);

impl KeyPath {
    /// Separator between key segments.
    pub const SEPARATOR: char = '/';

    /// Create a normalized key path.
    pub fn new(path: &str) -> Self {
        let segments: Vec<&str> = path
            .split(Self::SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        Self(segments.join("/"))
    }

    /// The store root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Check if this is the store root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a child path.
    pub fn join(&self, child: &str) -> Self {
        let child = Self::new(child);
        if self.is_root() {
            child
        } else if child.is_root() {
            self.clone()
        } else {
            Self(format!("{}/{}", self.0, child.0))
        }
    }

    /// Parent key, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(Self::SEPARATOR) {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Final segment of the path.
    pub fn last_segment(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit(Self::SEPARATOR).next()
    }

    /// True if `other` lies strictly below this key.
    pub fn is_ancestor_of(&self, other: &KeyPath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// True if `other` is this key or lies below it.
    pub fn covers(&self, other: &KeyPath) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Segments of `other` below this key, if it is a descendant.
    pub fn relative<'a>(&self, other: &'a KeyPath) -> Option<Vec<&'a str>> {
        if !self.is_ancestor_of(other) {
            return None;
        }
        let rest = if self.is_root() {
            other.0.as_str()
        } else {
            &other.0[self.0.len() + 1..]
        };
        Some(rest.split(Self::SEPARATOR).collect())
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for KeyPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for KeyPath {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<KeyPath> for String {
    fn from(k: KeyPath) -> Self {
        k.0
    }
}
