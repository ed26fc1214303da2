use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Number of random bytes in a generated local id (16 hex characters).
const LOCAL_ID_BYTES: usize = 8;

/// Stable identifier of a node or component inside one template scope.
///
/// Local ids are assigned when an object first becomes template content and
/// are copied verbatim into every instance, which is what makes an instance
/// object addressable relative to its template.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Wrap an existing identifier. Empty strings and `/` are rejected since
    /// they would make [`LocalIdPath`] rendering ambiguous.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() || id.contains('/') {
            return Err(TypeError::InvalidLocalId(id));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random local id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; LOCAL_ID_BYTES];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(hex::encode(bytes))
    }

    /// Deterministically derive a replacement for `base`.
    ///
    /// The same `(base, salt)` pair always yields the same id, so repairing
    /// duplicated ids is reproducible across runs.
    pub fn derive(base: &LocalId, salt: u32) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"prefab-local-id-v1:");
        hasher.update(base.0.as_bytes());
        hasher.update(b":");
        hasher.update(&salt.to_le_bytes());
        let hash = hasher.finalize();
        Self(hex::encode(&hash.as_bytes()[..LOCAL_ID_BYTES]))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered sequence of [`LocalId`] segments locating an object relative to
/// an instance root.
///
/// Each nested instance crossed on the way down contributes the local id of
/// its instance record; the final segment is the object's own local id.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalIdPath(Vec<LocalId>);

impl LocalIdPath {
    /// The empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// A path from its segments, outermost first.
    pub fn from_segments(segments: Vec<LocalId>) -> Self {
        Self(segments)
    }

    /// A path with exactly one segment.
    pub fn single(id: LocalId) -> Self {
        Self(vec![id])
    }

    /// Segments, outermost first.
    pub fn segments(&self) -> &[LocalId] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Outermost segment.
    pub fn first(&self) -> Option<&LocalId> {
        self.0.first()
    }

    /// Innermost segment.
    pub fn last(&self) -> Option<&LocalId> {
        self.0.last()
    }

    /// Append an inner segment.
    pub fn push(&mut self, id: LocalId) {
        self.0.push(id);
    }

    /// Prepend an outer segment.
    pub fn push_front(&mut self, id: LocalId) {
        self.0.insert(0, id);
    }

    /// A copy of this path with `id` appended.
    pub fn child(&self, id: LocalId) -> Self {
        let mut path = self.clone();
        path.push(id);
        path
    }

    /// All segments except the last one. `None` for an empty path.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    /// The path with its first segment removed. `None` for an empty path.
    pub fn strip_first(&self) -> Option<Self> {
        let (_, rest) = self.0.split_first()?;
        Some(Self(rest.to_vec()))
    }

    /// Returns `true` if this path crosses at least one nested-instance
    /// boundary (more than one segment).
    pub fn is_nested(&self) -> bool {
        self.0.len() > 1
    }

    /// Whether `prefix` is a leading part of this path.
    pub fn starts_with(&self, prefix: &LocalIdPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Debug for LocalIdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalIdPath({self})")
    }
}

impl fmt::Display for LocalIdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(segment.as_str())?;
        }
        Ok(())
    }
}

impl From<Vec<LocalId>> for LocalIdPath {
    fn from(segments: Vec<LocalId>) -> Self {
        Self(segments)
    }
}

impl FromIterator<LocalId> for LocalIdPath {
    fn from_iter<I: IntoIterator<Item = LocalId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lid(s: &str) -> LocalId {
        LocalId::new(s).unwrap()
    }

    #[test]
    fn generated_ids_are_unique_hex() {
        let a = LocalId::generate();
        let b = LocalId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), LOCAL_ID_BYTES * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn derive_is_deterministic_and_salted() {
        let base = lid("root");
        assert_eq!(LocalId::derive(&base, 1), LocalId::derive(&base, 1));
        assert_ne!(LocalId::derive(&base, 1), LocalId::derive(&base, 2));
        assert_ne!(LocalId::derive(&base, 1), base);
    }

    #[test]
    fn new_rejects_empty_and_separator() {
        assert!(LocalId::new("").is_err());
        assert!(LocalId::new("a/b").is_err());
    }

    #[test]
    fn path_navigation() {
        let path = LocalIdPath::from_segments(vec![lid("outer"), lid("inner"), lid("leaf")]);
        assert!(path.is_nested());
        assert_eq!(path.first(), Some(&lid("outer")));
        assert_eq!(path.last(), Some(&lid("leaf")));
        assert_eq!(path.strip_first().unwrap().to_string(), "inner/leaf");
        assert_eq!(path.parent().unwrap().to_string(), "outer/inner");
        assert!(path.starts_with(&LocalIdPath::single(lid("outer"))));
    }

    #[test]
    fn empty_path_has_no_parent() {
        assert!(LocalIdPath::new().parent().is_none());
        assert!(LocalIdPath::new().strip_first().is_none());
        assert!(!LocalIdPath::single(lid("x")).is_nested());
    }

    #[test]
    fn push_front_prepends() {
        let mut path = LocalIdPath::single(lid("leaf"));
        path.push_front(lid("nested"));
        assert_eq!(path.to_string(), "nested/leaf");
    }

    #[test]
    fn path_serializes_as_string_array() {
        let path = LocalIdPath::from_segments(vec![lid("a"), lid("b")]);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }
}
