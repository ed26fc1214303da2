//! Per-type field metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Type name of every scene node.
pub const NODE_TYPE: &str = "Node";

/// Built-in node fields.
pub const NODE_NAME: &str = "name";
pub const NODE_POSITION: &str = "position";
pub const NODE_ROTATION: &str = "rotation";
pub const NODE_SCALE: &str = "scale";
pub const NODE_ACTIVE: &str = "active";

/// Attribute metadata for one declared field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    /// Persisted and therefore subject to overrides.
    pub serializable: bool,
    /// Shown in the inspector. Wholesale component changes only record
    /// visible fields.
    pub visible: bool,
}

/// Declared shape of a node, component or record type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub name: String,
    pub fields: Vec<FieldMeta>,
    /// Whether objects of this type may be saved into a template.
    pub templatable: bool,
}

impl TypeSchema {
    /// A templatable type with no declared fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            templatable: true,
        }
    }

    /// Declare a serializable, visible field.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldMeta {
            name: name.into(),
            serializable: true,
            visible: true,
        });
        self
    }

    /// Declare a serializable field hidden from the inspector.
    pub fn hidden_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldMeta {
            name: name.into(),
            serializable: true,
            visible: false,
        });
        self
    }

    /// Declare a runtime-only field that is never persisted.
    pub fn transient_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldMeta {
            name: name.into(),
            serializable: false,
            visible: true,
        });
        self
    }

    /// Mark the type as unusable inside templates.
    pub fn not_templatable(mut self) -> Self {
        self.templatable = false;
        self
    }

    /// Fields written to template documents.
    pub fn serializable_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|f| f.serializable)
    }
}

/// Registry of known type schemas.
///
/// Types without a schema are treated permissively: every present field is
/// serializable and visible, and the type is templatable.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    types: HashMap<String, TypeSchema>,
}

impl TypeRegistry {
    /// A registry that knows the built-in node type.
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
        };
        registry.register(
            TypeSchema::new(NODE_TYPE)
                .field(NODE_NAME)
                .field(NODE_POSITION)
                .field(NODE_ROTATION)
                .field(NODE_SCALE)
                .field(NODE_ACTIVE),
        );
        registry
    }

    /// Register (or replace) a schema.
    pub fn register(&mut self, schema: TypeSchema) {
        self.types.insert(schema.name.clone(), schema);
    }

    /// Schema registered for `type_name`.
    pub fn get(&self, type_name: &str) -> Option<&TypeSchema> {
        self.types.get(type_name)
    }

    /// Whether `type_name` may appear in a template. Unknown types may.
    pub fn is_templatable(&self, type_name: &str) -> bool {
        self.get(type_name).map_or(true, |schema| schema.templatable)
    }

    /// Serializable field names for an object of `type_name`, given the
    /// names actually present on the two objects being compared.
    pub fn serializable_field_names<'a>(
        &self,
        type_name: &str,
        present: impl IntoIterator<Item = &'a String>,
    ) -> Vec<String> {
        match self.get(type_name) {
            Some(schema) => schema.serializable_fields().map(|f| f.name.clone()).collect(),
            None => {
                let mut names: Vec<String> = present.into_iter().cloned().collect();
                names.sort();
                names.dedup();
                names
            }
        }
    }

    /// Fields recorded when a whole component is reported as changed.
    pub fn visible_field_names<'a>(
        &self,
        type_name: &str,
        present: impl IntoIterator<Item = &'a String>,
    ) -> Vec<String> {
        match self.get(type_name) {
            Some(schema) => schema
                .serializable_fields()
                .filter(|f| f.visible)
                .map(|f| f.name.clone())
                .collect(),
            None => self.serializable_field_names(type_name, present),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
