use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Leading segment used by change notifications to address a component of
/// a node: `__comps__.<index>.<field>...`.
pub const COMPONENTS_SEGMENT: &str = "__comps__";

/// Path of a field inside a node or component, one segment per level.
///
/// Array elements are addressed by their decimal index and the synthetic
/// `length` segment addresses an array's length.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyPath(Vec<String>);

impl PropertyPath {
    /// The empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// A path from its segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted/bracketed path such as `items[2].color` or
    /// `__comps__.1.target`.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidPropertyPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if current.is_empty() {
                        return Err(invalid("empty segment"));
                    }
                    segments.push(std::mem::take(&mut current));
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    } else if segments.is_empty() {
                        return Err(invalid("index without a field"));
                    }
                    let mut index = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => index.push(d),
                            Some(_) => return Err(invalid("non-numeric index")),
                            None => return Err(invalid("unterminated index")),
                        }
                    }
                    if index.is_empty() {
                        return Err(invalid("empty index"));
                    }
                    segments.push(index);
                    // An index may be followed by `.field` or another `[n]`.
                    if let Some(next) = chars.clone().next() {
                        if next == '.' {
                            chars.next();
                            if chars.clone().next().is_none() {
                                return Err(invalid("trailing separator"));
                            }
                        } else if next != '[' {
                            return Err(invalid("unexpected character after index"));
                        }
                    }
                }
                ']' => return Err(invalid("unbalanced bracket")),
                c => current.push(c),
            }
        }

        if !current.is_empty() {
            segments.push(current);
        } else if raw.ends_with('.') {
            return Err(invalid("trailing separator"));
        }

        if segments.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self(segments))
    }

    /// Segments in order.
    pub fn segments(&self) -> &[String] {
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

    /// First segment, naming the top-level field.
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Append a segment.
    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    /// A copy of this path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    /// Whether `prefix` is a leading part of this path.
    pub fn starts_with(&self, prefix: &PropertyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The path without its first `n` segments.
    pub fn skip(&self, n: usize) -> Self {
        Self(self.0.iter().skip(n).cloned().collect())
    }

    /// Split a `__comps__.<index>...` path into the component index and the
    /// remaining field path (empty when the whole component is addressed).
    pub fn split_component(&self) -> Option<(usize, PropertyPath)> {
        if self.first()? != COMPONENTS_SEGMENT {
            return None;
        }
        let index = self.0.get(1)?.parse().ok()?;
        Some((index, self.skip(2)))
    }

    /// Build the notification path of a field on the component at `index`.
    pub fn component_field(index: usize, field: &PropertyPath) -> Self {
        let mut segments = vec![COMPONENTS_SEGMENT.to_string(), index.to_string()];
        segments.extend(field.0.iter().cloned());
        Self(segments)
    }
}

impl fmt::Debug for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyPath({self})")
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_dotted() {
        let path = PropertyPath::parse("style.color").unwrap();
        assert_eq!(path.segments(), ["style", "color"]);
    }

    #[test]
    fn parse_brackets() {
        let path = PropertyPath::parse("items[2].color").unwrap();
        assert_eq!(path.segments(), ["items", "2", "color"]);

        let path = PropertyPath::parse("grid[1][3]").unwrap();
        assert_eq!(path.segments(), ["grid", "1", "3"]);
    }

    #[test]
    fn parse_rejects_malformed() {
        for raw in ["", ".a", "a.", "a..b", "a[", "a[x]", "a]", "[1]", "a[1]b", "a[1]."] {
            assert!(PropertyPath::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn split_component_paths() {
        let path = PropertyPath::parse("__comps__.3.target").unwrap();
        let (index, rest) = path.split_component().unwrap();
        assert_eq!(index, 3);
        assert_eq!(rest.segments(), ["target"]);

        let whole = PropertyPath::parse("__comps__.0").unwrap();
        let (index, rest) = whole.split_component().unwrap();
        assert_eq!(index, 0);
        assert!(rest.is_empty());

        assert!(PropertyPath::parse("position").unwrap().split_component().is_none());
        assert!(PropertyPath::parse("__comps__.x").unwrap().split_component().is_none());
    }

    #[test]
    fn component_field_builds_notification_path() {
        let field = PropertyPath::from_segments(["color"]);
        let path = PropertyPath::component_field(2, &field);
        assert_eq!(path.to_string(), "__comps__.2.color");
    }

    #[test]
    fn child_and_prefix() {
        let base = PropertyPath::from_segments(["items"]);
        let len = base.child("length");
        assert!(len.starts_with(&base));
        assert!(!base.starts_with(&len));
        assert_eq!(len.skip(1).segments(), ["length"]);
    }

    proptest! {
        #[test]
        fn dotted_identifiers_parse_back(segments in prop::collection::vec("[a-z_][a-z0-9_]{0,6}", 1..5)) {
            let raw = segments.join(".");
            let parsed = PropertyPath::parse(&raw).unwrap();
            prop_assert_eq!(parsed.segments(), segments.as_slice());
            prop_assert_eq!(parsed.to_string(), raw);
        }
    }
}
