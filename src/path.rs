// Data-path model
// Persistent root-to-leaf addresses into the JSON data tree

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::{Serialize, Serializer};
use thiserror::Error;

/// One step of a [`DataPath`]: either a field name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object field access by name
    Field(String),
    /// Array element access by zero-based index
    Index(usize),
}

/// An ordered root-to-leaf address into a hierarchical JSON-like data tree.
///
/// Internally this is a persistent singly linked stack built by prepending:
/// extending a path to a child is O(1) and shares structure with the parent,
/// so the many temporary rebasings performed during map/filter/for-each
/// broadcasting never copy or disturb sibling paths.
///
/// The canonical text form joins field segments with `.` and renders index
/// segments as `[N]` with no preceding dot, e.g. `items[0].name`.
/// [`DataPath::parse`] is the exact inverse of [`fmt::Display`].
///
/// # Examples
///
/// ```
/// use pathrule::path::DataPath;
///
/// let p = DataPath::root().field("items").index(2).field("name");
/// assert_eq!(p.to_string(), "items[2].name");
/// assert_eq!(DataPath::parse("items[2].name").unwrap(), p);
/// ```
#[derive(Clone, Default)]
pub struct DataPath {
    leaf: Option<Rc<Node>>,
}

struct Node {
    segment: PathSegment,
    parent: Option<Rc<Node>>,
}

/// Errors produced when parsing canonical path text back into a [`DataPath`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathParseError {
    #[error("empty field segment at byte {0}")]
    EmptyField(usize),
    #[error("malformed array index at byte {0}")]
    BadIndex(usize),
    #[error("expected '.' or '[' at byte {0}")]
    ExpectedSeparator(usize),
}

impl DataPath {
    /// The empty path, addressing the data root.
    pub fn root() -> Self {
        DataPath { leaf: None }
    }

    /// True if this path addresses the data root.
    pub fn is_root(&self) -> bool {
        self.leaf.is_none()
    }

    /// Number of segments between the root and this path.
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.leaf.as_ref();
        while let Some(node) = cur {
            n += 1;
            cur = node.parent.as_ref();
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Extend the path with an arbitrary segment. O(1), shares the parent.
    pub fn push(&self, segment: PathSegment) -> Self {
        DataPath {
            leaf: Some(Rc::new(Node {
                segment,
                parent: self.leaf.clone(),
            })),
        }
    }

    /// Extend the path with a field segment.
    pub fn field(&self, name: impl Into<String>) -> Self {
        self.push(PathSegment::Field(name.into()))
    }

    /// Extend the path with an index segment.
    pub fn index(&self, i: usize) -> Self {
        self.push(PathSegment::Index(i))
    }

    /// Segments in root-to-leaf order (the internal stack is reversed).
    pub fn segments(&self) -> Vec<PathSegment> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.leaf.as_ref();
        while let Some(node) = cur {
            out.push(node.segment.clone());
            cur = node.parent.as_ref();
        }
        out.reverse();
        out
    }

    /// Concatenation: `self` followed by every segment of `other`.
    /// Used to turn a base-relative path into an absolute one.
    pub fn join(&self, other: &DataPath) -> Self {
        let mut out = self.clone();
        for segment in other.segments() {
            out = out.push(segment);
        }
        out
    }

    /// Build a path from segments in root-to-leaf order.
    pub fn from_segments(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        let mut out = DataPath::root();
        for segment in segments {
            out = out.push(segment);
        }
        out
    }

    /// Parse the canonical text form. Inverse of [`fmt::Display`]:
    /// `DataPath::parse(&p.to_string()) == Ok(p)` for every path `p`.
    pub fn parse(text: &str) -> Result<Self, PathParseError> {
        let bytes = text.as_bytes();
        let mut path = DataPath::root();
        let mut i = 0;
        let mut first = true;
        while i < bytes.len() {
            if bytes[i] == b'[' {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                if i == bytes.len() {
                    return Err(PathParseError::BadIndex(start));
                }
                let index: usize = text[start..i]
                    .parse()
                    .map_err(|_| PathParseError::BadIndex(start))?;
                path = path.index(index);
                i += 1;
                first = false;
                continue;
            }
            if !first {
                // a field segment after the first is introduced by '.'
                if bytes[i] != b'.' {
                    return Err(PathParseError::ExpectedSeparator(i));
                }
                i += 1;
            }
            let start = i;
            while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                i += 1;
            }
            if i == start {
                return Err(PathParseError::EmptyField(start));
            }
            path = path.field(&text[start..i]);
            first = false;
        }
        Ok(path)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments().iter().enumerate() {
            match segment {
                PathSegment::Field(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                PathSegment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataPath(\"{self}\")")
    }
}

impl PartialEq for DataPath {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.leaf.as_ref();
        let mut b = other.leaf.as_ref();
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Rc::ptr_eq(x, y) {
                        // shared tail, the rest is identical by construction
                        return true;
                    }
                    if x.segment != y.segment {
                        return false;
                    }
                    a = x.parent.as_ref();
                    b = y.parent.as_ref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for DataPath {}

impl Hash for DataPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // leaf-to-root order is fine as long as it is consistent with Eq
        let mut cur = self.leaf.as_ref();
        while let Some(node) = cur {
            node.segment.hash(state);
            cur = node.parent.as_ref();
        }
        self.len().hash(state);
    }
}

impl FromStr for DataPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataPath::parse(s)
    }
}

impl Serialize for DataPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DataPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PathVisitor;

        impl Visitor<'_> for PathVisitor {
            type Value = DataPath;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a canonical data path string such as \"items[0].name\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<DataPath, E> {
                DataPath::parse(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(PathVisitor)
    }
}
