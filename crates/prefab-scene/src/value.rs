//! Closed set of serializable field values.
//!
//! Every field of a node, component or nested record holds a [`Value`].
//! Algorithms that walk fields (diffing, reference remapping, override
//! replay) branch on this finite tag set instead of inspecting runtime
//! types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use prefab_types::{AssetId, ComponentId, NodeId, PropertyPath, Target};

/// Named fields of an object, ordered by name.
pub type Fields = BTreeMap<String, Value>;

/// Synthetic path segment addressing the length of an array.
pub const LENGTH_SEGMENT: &str = "length";

/// Largest array a path write may grow to.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Value types that carry their own equality operator.
///
/// Components are compared with [`MathValue::EPSILON`] tolerance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "v", rename_all = "snake_case")]
pub enum MathValue {
    Vec2([f64; 2]),
    Vec3([f64; 3]),
    Quat([f64; 4]),
    Color([f64; 4]),
    Size([f64; 2]),
}

impl MathValue {
    pub const EPSILON: f64 = 1e-6;

    /// Components as a flat slice.
    pub fn components(&self) -> &[f64] {
        match self {
            Self::Vec2(v) | Self::Size(v) => v.as_slice(),
            Self::Vec3(v) => v.as_slice(),
            Self::Quat(v) | Self::Color(v) => v.as_slice(),
        }
    }

    /// Approximate equality. Values of different kinds are never equal.
    pub fn approx_eq(&self, other: &MathValue) -> bool {
        if std::mem::discriminant(self) != std::mem::discriminant(other) {
            return false;
        }
        self.components()
            .iter()
            .zip(other.components())
            .all(|(a, b)| (a - b).abs() <= Self::EPSILON)
    }
}

/// A typed nested structure (not a node, component or math value).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_name: String,
    pub fields: Fields,
}

impl Record {
    /// An empty record of `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Fields::new(),
        }
    }

    /// Builder: set field `name`.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// A serializable field value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    NodeRef(NodeId),
    ComponentRef(ComponentId),
    Asset(AssetId),
    Math(MathValue),
    Record(Record),
}

impl Value {
    /// Whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Array(_) => "array",
            Self::NodeRef(_) => "node_ref",
            Self::ComponentRef(_) => "component_ref",
            Self::Asset(_) => "asset",
            Self::Math(_) => "math",
            Self::Record(_) => "record",
        }
    }

    /// A string value.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// A vector value.
    pub fn vec3(x: f64, y: f64, z: f64) -> Self {
        Self::Math(MathValue::Vec3([x, y, z]))
    }

    /// A quaternion value.
    pub fn quat(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self::Math(MathValue::Quat([x, y, z, w]))
    }

    /// A color value.
    pub fn color(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self::Math(MathValue::Color([r, g, b, a]))
    }

    /// The referenced object when this value is a node or component reference.
    pub fn as_target(&self) -> Option<Target> {
        match self {
            Self::NodeRef(id) => Some(Target::Node(*id)),
            Self::ComponentRef(id) => Some(Target::Component(*id)),
            _ => None,
        }
    }

    /// A reference to `target`.
    pub fn from_target(target: Target) -> Self {
        match target {
            Target::Node(id) => Self::NodeRef(id),
            Target::Component(id) => Self::ComponentRef(id),
        }
    }

    /// Returns `true` if this value or anything nested in it is a reference.
    pub fn contains_refs(&self) -> bool {
        match self {
            Self::NodeRef(_) | Self::ComponentRef(_) => true,
            Self::Array(items) => items.iter().any(Value::contains_refs),
            Self::Record(record) => record.fields.values().any(Value::contains_refs),
            _ => false,
        }
    }

    /// Visit every node/component reference nested in this value together
    /// with its path relative to `base`.
    pub fn visit_refs(&self, base: &PropertyPath, f: &mut dyn FnMut(&PropertyPath, Target)) {
        match self {
            Self::NodeRef(id) => f(base, Target::Node(*id)),
            Self::ComponentRef(id) => f(base, Target::Component(*id)),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.visit_refs(&base.child(i.to_string()), f);
                }
            }
            Self::Record(record) => {
                for (name, value) in &record.fields {
                    value.visit_refs(&base.child(name.as_str()), f);
                }
            }
            _ => {}
        }
    }

    /// Rewrite every nested reference in place. The callback returns the
    /// replacement value for the reference it is given.
    pub fn map_refs(&mut self, f: &mut dyn FnMut(Target) -> Value) {
        match self {
            Self::NodeRef(id) => *self = f(Target::Node(*id)),
            Self::ComponentRef(id) => *self = f(Target::Component(*id)),
            Self::Array(items) => items.iter_mut().for_each(|item| item.map_refs(f)),
            Self::Record(record) => record.fields.values_mut().for_each(|v| v.map_refs(f)),
            _ => {}
        }
    }

    fn child(&self, segment: &str) -> Option<&Value> {
        match self {
            Self::Array(items) => items.get(segment.parse::<usize>().ok()?),
            Self::Record(record) => record.fields.get(segment),
            _ => None,
        }
    }

    /// Look up a nested value. A trailing `length` segment on an array
    /// yields the array length.
    pub fn get_path(&self, segments: &[String]) -> Option<Value> {
        let Some((last, parents)) = segments.split_last() else {
            return Some(self.clone());
        };
        let mut current = self;
        for segment in parents {
            current = current.child(segment)?;
        }
        match current {
            Self::Array(items) if last == LENGTH_SEGMENT => Some(Self::Int(items.len() as i64)),
            other => other.child(last).cloned(),
        }
    }

    /// Write a nested value. Missing record fields are created on the last
    /// segment only.
    ///
    /// Writing an array index past the end pads with [`Value::Null`]; writing
    /// `length` resizes the array. Returns `false` if the path cannot be
    /// reached (for example indexing into a string) or would grow an array
    /// past [`MAX_ARRAY_LEN`].
    pub fn set_path(&mut self, segments: &[String], value: Value) -> bool {
        let Some((first, rest)) = segments.split_first() else {
            *self = value;
            return true;
        };
        match self {
            Self::Array(items) => {
                if first == LENGTH_SEGMENT && rest.is_empty() {
                    return match value {
                        Self::Int(len) => match usize::try_from(len) {
                            Ok(len) if len <= MAX_ARRAY_LEN => {
                                items.resize(len, Self::Null);
                                true
                            }
                            _ => false,
                        },
                        _ => false,
                    };
                }
                let Ok(index) = first.parse::<usize>() else {
                    return false;
                };
                if index >= MAX_ARRAY_LEN {
                    return false;
                }
                if index >= items.len() {
                    items.resize(index + 1, Self::Null);
                }
                items[index].set_path(rest, value)
            }
            Self::Record(record) => {
                if rest.is_empty() {
                    record.fields.insert(first.clone(), value);
                    return true;
                }
                match record.fields.get_mut(first) {
                    Some(inner) => inner.set_path(rest, value),
                    None => false,
                }
            }
            _ => false,
        }
    }
}

/// Read the value at `path` inside `fields`.
pub fn read_field(fields: &Fields, path: &PropertyPath) -> Option<Value> {
    let (first, rest) = path.segments().split_first()?;
    fields.get(first)?.get_path(rest)
}

/// Write the value at `path` inside `fields`. See [`Value::set_path`].
pub fn write_field(fields: &mut Fields, path: &PropertyPath, value: Value) -> bool {
    let Some((first, rest)) = path.segments().split_first() else {
        return false;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return true;
    }
    match fields.get_mut(first) {
        Some(inner) => inner.set_path(rest, value),
        None => false,
    }
}

/// Rewrite every reference in a field map. See [`Value::map_refs`].
pub fn map_field_refs(fields: &mut Fields, f: &mut dyn FnMut(Target) -> Value) {
    for value in fields.values_mut() {
        value.map_refs(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    #[test]
    fn math_values_compare_with_epsilon() {
        let a = MathValue::Vec3([1.0, 2.0, 3.0]);
        let b = MathValue::Vec3([1.0, 2.0 + 1e-9, 3.0]);
        let c = MathValue::Vec3([1.0, 2.1, 3.0]);
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&c));
        assert!(!MathValue::Quat([0.0; 4]).approx_eq(&MathValue::Color([0.0; 4])));
    }

    #[test]
    fn read_nested_and_length() {
        let mut fields = Fields::new();
        fields.insert(
            "items".into(),
            Value::Array(vec![
                Value::Record(Record::new("Item").with("color", Value::str("red"))),
                Value::Int(4),
            ]),
        );
        assert_eq!(read_field(&fields, &path("items[0].color")), Some(Value::str("red")));
        assert_eq!(read_field(&fields, &path("items.length")), Some(Value::Int(2)));
        assert_eq!(read_field(&fields, &path("items[5]")), None);
        assert_eq!(read_field(&fields, &path("missing")), None);
    }

    #[test]
    fn write_pads_and_resizes_arrays() {
        let mut fields = Fields::new();
        fields.insert("items".into(), Value::Array(vec![Value::Int(1)]));

        assert!(write_field(&mut fields, &path("items[2]"), Value::Int(3)));
        assert_eq!(
            fields["items"],
            Value::Array(vec![Value::Int(1), Value::Null, Value::Int(3)])
        );

        assert!(write_field(&mut fields, &path("items.length"), Value::Int(1)));
        assert_eq!(fields["items"], Value::Array(vec![Value::Int(1)]));
    }

    #[test]
    fn write_rejects_unreachable_paths() {
        let mut fields = Fields::new();
        fields.insert("name".into(), Value::str("a"));
        assert!(!write_field(&mut fields, &path("name.inner"), Value::Int(1)));
    }

    #[test]
    fn write_rejects_oversized_arrays() {
        let mut empty = Value::Array(Vec::new());
        assert!(!empty.set_path(&[LENGTH_SEGMENT.to_string()], Value::Int(i64::MAX)));
        assert!(!empty.set_path(&[LENGTH_SEGMENT.to_string()], Value::Int(-1)));
        assert!(!empty.set_path(&[usize::MAX.to_string()], Value::Int(1)));
        assert!(!empty.set_path(&[MAX_ARRAY_LEN.to_string()], Value::Int(1)));
        assert_eq!(empty, Value::Array(Vec::new()));
    }

    #[test]
    fn visit_and_map_refs() {
        let node = NodeId::new();
        let comp = ComponentId::new();
        let mut value = Value::Array(vec![
            Value::NodeRef(node),
            Value::Record(Record::new("Link").with("to", Value::ComponentRef(comp))),
        ]);

        let mut seen = Vec::new();
        value.visit_refs(&path("links"), &mut |p, t| seen.push((p.to_string(), t)));
        assert_eq!(
            seen,
            vec![
                ("links.0".to_string(), Target::Node(node)),
                ("links.1.to".to_string(), Target::Component(comp)),
            ]
        );

        value.map_refs(&mut |_| Value::Null);
        assert!(!value.contains_refs());
    }

    #[test]
    fn value_json_is_tagged() {
        let json = serde_json::to_string(&Value::Int(3)).unwrap();
        assert_eq!(json, r#"{"kind":"int","value":3}"#);
        let null: Value = serde_json::from_str(r#"{"kind":"null"}"#).unwrap();
        assert!(null.is_null());
    }
}
