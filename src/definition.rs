//! Declarative schema descriptions.
//!
//! A [`SchemaDefinition`] is pure data: a [`SchemaNode`] describing the kind of
//! value, plus orthogonal modifiers (optional, nullable, default, catch, brand,
//! pipe), refinements and transformations. Definitions round-trip through JSON
//! in the camelCase format stored with each artifact:
//!
//! ```
//! use form_schema::SchemaDefinition;
//! use serde_json::json;
//!
//! let definition: SchemaDefinition = serde_json::from_value(json!({
//!     "type": {
//!         "type": "object",
//!         "shape": {
//!             "email": { "type": { "type": "string", "validation": { "email": {} } } },
//!             "age": { "type": "number", "optional": true }
//!         }
//!     }
//! }))
//! .unwrap();
//!
//! assert!(definition.check().is_ok());
//! ```

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalformedSchema;
use crate::types::join_pointer;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Deserialize a present field as `Some`, so that an explicit `null` survives.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A rule parameter with an optional custom failure message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound<T> {
    pub value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Bound<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            message: None,
        }
    }

    pub fn with_message(value: T, message: impl Into<String>) -> Self {
        Self {
            value,
            message: Some(message.into()),
        }
    }
}

/// A parameterless rule with an optional custom failure message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Includes {
    pub value: String,
    /// Character offset the search starts at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Bound<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Bound<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<Bound<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<Pattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub includes: Option<Includes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<Bound<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<Bound<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Bound<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Bound<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<Bound<f64>>,
}

/// Date bounds, given as RFC 3339 timestamps or `YYYY-MM-DD` dates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Bound<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Bound<String>>,
}

/// Size rules shared by arrays and sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LengthRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Bound<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Bound<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<Bound<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonempty: Option<Flag>,
}

macro_rules! impl_is_empty {
    ($($rules:ty),*) => {
        $(impl $rules {
            /// True when no rule is declared.
            pub fn is_empty(&self) -> bool {
                *self == Self::default()
            }
        })*
    };
}

impl_is_empty!(StringRules, NumberRules, DateRules, LengthRules);

/// Field name to definition mapping that keeps declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape(Vec<(String, SchemaDefinition)>);

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing an existing definition in place.
    pub fn insert(&mut self, key: impl Into<String>, definition: SchemaDefinition) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = definition,
            None => self.0.push((key, definition)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&SchemaDefinition> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, d)| d)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaDefinition)> {
        self.0.iter().map(|(k, d)| (k.as_str(), d))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, SchemaDefinition)> for Shape {
    fn from_iter<I: IntoIterator<Item = (K, SchemaDefinition)>>(iter: I) -> Self {
        let mut shape = Shape::new();
        for (key, definition) in iter {
            shape.insert(key, definition);
        }
        shape
    }
}

impl Serialize for Shape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, definition) in &self.0 {
            map.serialize_entry(key, definition)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Shape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ShapeVisitor;

        impl<'de> Visitor<'de> for ShapeVisitor {
            type Value = Shape;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field names to schema definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Shape, A::Error> {
                let mut fields: Vec<(String, SchemaDefinition)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, definition)) =
                    access.next_entry::<String, SchemaDefinition>()?
                {
                    if fields.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!(
                            "duplicate field `{}` in object shape",
                            key
                        )));
                    }
                    fields.push((key, definition));
                }
                Ok(Shape(fields))
            }
        }

        deserializer.deserialize_map(ShapeVisitor)
    }
}

/// The kind of value a definition describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SchemaNode {
    String {
        #[serde(default, skip_serializing_if = "StringRules::is_empty")]
        validation: StringRules,
    },
    Number {
        #[serde(default, skip_serializing_if = "NumberRules::is_empty")]
        validation: NumberRules,
    },
    Boolean,
    Date {
        #[serde(default, skip_serializing_if = "DateRules::is_empty")]
        validation: DateRules,
    },
    BigInt,
    Symbol,
    Undefined,
    Null,
    Array {
        element_type: Box<SchemaDefinition>,
        #[serde(default, skip_serializing_if = "LengthRules::is_empty")]
        validation: LengthRules,
    },
    Object {
        shape: Shape,
    },
    Enum {
        values: Vec<Value>,
    },
    Union {
        options: Vec<SchemaDefinition>,
    },
    Intersection {
        types: Vec<SchemaDefinition>,
    },
    Promise {
        value_type: Box<SchemaDefinition>,
    },
    Function {
        #[serde(default)]
        args: Vec<SchemaDefinition>,
        return_type: Box<SchemaDefinition>,
    },
    Literal {
        value: Value,
    },
    Record {
        key_type: Box<SchemaDefinition>,
        value_type: Box<SchemaDefinition>,
    },
    Map {
        key_type: Box<SchemaDefinition>,
        value_type: Box<SchemaDefinition>,
    },
    Set {
        value_type: Box<SchemaDefinition>,
        #[serde(default, skip_serializing_if = "LengthRules::is_empty")]
        validation: LengthRules,
    },
    InstanceOf {
        class_name: String,
    },
    Lazy {
        getter: String,
    },
}

impl SchemaNode {
    pub fn string() -> Self {
        SchemaNode::String {
            validation: StringRules::default(),
        }
    }

    pub fn number() -> Self {
        SchemaNode::Number {
            validation: NumberRules::default(),
        }
    }

    pub fn array(element: SchemaDefinition) -> Self {
        SchemaNode::Array {
            element_type: Box::new(element),
            validation: LengthRules::default(),
        }
    }

    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaDefinition)>,
    {
        SchemaNode::Object {
            shape: fields.into_iter().collect(),
        }
    }

    pub fn lazy(getter: impl Into<String>) -> Self {
        SchemaNode::Lazy {
            getter: getter.into(),
        }
    }

    /// Name of the node kind, as written in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaNode::String { .. } => "string",
            SchemaNode::Number { .. } => "number",
            SchemaNode::Boolean => "boolean",
            SchemaNode::Date { .. } => "date",
            SchemaNode::BigInt => "bigint",
            SchemaNode::Symbol => "symbol",
            SchemaNode::Undefined => "undefined",
            SchemaNode::Null => "null",
            SchemaNode::Array { .. } => "array",
            SchemaNode::Object { .. } => "object",
            SchemaNode::Enum { .. } => "enum",
            SchemaNode::Union { .. } => "union",
            SchemaNode::Intersection { .. } => "intersection",
            SchemaNode::Promise { .. } => "promise",
            SchemaNode::Function { .. } => "function",
            SchemaNode::Literal { .. } => "literal",
            SchemaNode::Record { .. } => "record",
            SchemaNode::Map { .. } => "map",
            SchemaNode::Set { .. } => "set",
            SchemaNode::InstanceOf { .. } => "instanceof",
            SchemaNode::Lazy { .. } => "lazy",
        }
    }

    /// Nested definitions with their pointer segments relative to this node.
    pub fn children(&self) -> Vec<(String, &SchemaDefinition)> {
        fn indexed<'a>(
            key: &str,
            items: &'a [SchemaDefinition],
        ) -> impl Iterator<Item = (String, &'a SchemaDefinition)> + 'a {
            let key = key.to_string();
            items
                .iter()
                .enumerate()
                .map(move |(i, d)| (format!("/{}/{}", key, i), d))
        }

        match self {
            SchemaNode::Array { element_type, .. } => {
                vec![("/elementType".to_string(), element_type.as_ref())]
            }
            SchemaNode::Object { shape } => shape
                .iter()
                .map(|(key, d)| (join_pointer("/shape", key), d))
                .collect(),
            SchemaNode::Union { options } => indexed("options", options).collect(),
            SchemaNode::Intersection { types } => indexed("types", types).collect(),
            SchemaNode::Promise { value_type } | SchemaNode::Set { value_type, .. } => {
                vec![("/valueType".to_string(), value_type.as_ref())]
            }
            SchemaNode::Function { args, return_type } => indexed("args", args)
                .chain(std::iter::once((
                    "/returnType".to_string(),
                    return_type.as_ref(),
                )))
                .collect(),
            SchemaNode::Record {
                key_type,
                value_type,
            }
            | SchemaNode::Map {
                key_type,
                value_type,
            } => vec![
                ("/keyType".to_string(), key_type.as_ref()),
                ("/valueType".to_string(), value_type.as_ref()),
            ],
            _ => Vec::new(),
        }
    }
}

/// Accept either a tagged node object or a bare primitive name (`"boolean"`).
fn deserialize_node<'de, D>(deserializer: D) -> Result<SchemaNode, D::Error>
where
    D: Deserializer<'de>,
{
    struct NodeVisitor;

    impl<'de> Visitor<'de> for NodeVisitor {
        type Value = SchemaNode;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a node kind name or a tagged node object")
        }

        fn visit_str<E: de::Error>(self, name: &str) -> Result<SchemaNode, E> {
            SchemaNode::deserialize(serde_json::json!({ "type": name })).map_err(E::custom)
        }

        // Streams the map straight through so nested shapes still see
        // repeated keys.
        fn visit_map<A: MapAccess<'de>>(self, access: A) -> Result<SchemaNode, A::Error> {
            SchemaNode::deserialize(de::value::MapAccessDeserializer::new(access))
        }
    }

    deserializer.deserialize_any(NodeVisitor)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefinementKind {
    /// Boolean predicate; failure reports the refinement message.
    #[default]
    Refine,
    /// Callback that reports any number of issues itself.
    SuperRefine,
}

/// Custom validation step run after the base validator succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    #[serde(rename = "type", default)]
    pub kind: RefinementKind,
    /// Registered predicate or super-refinement name.
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Path, relative to the refined value, the issue is reported at.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl Refinement {
    pub fn refine(function: impl Into<String>) -> Self {
        Self {
            kind: RefinementKind::Refine,
            function: function.into(),
            message: None,
            path: Vec::new(),
        }
    }

    pub fn super_refine(function: impl Into<String>) -> Self {
        Self {
            kind: RefinementKind::SuperRefine,
            ..Self::refine(function)
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn at<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }
}

/// Value-mapping step run after all validation succeeds.
///
/// Deserializes from either `{ "function": ..., "dependencies": [...] }` or a
/// bare function name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TransformationRepr")]
pub struct Transformation {
    /// Registered mapping name.
    pub function: String,
    /// Sibling fields whose values are handed to the mapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TransformationRepr {
    Name(String),
    Full {
        function: String,
        #[serde(default)]
        dependencies: Vec<String>,
    },
}

impl From<TransformationRepr> for Transformation {
    fn from(repr: TransformationRepr) -> Self {
        match repr {
            TransformationRepr::Name(function) => Transformation {
                function,
                dependencies: Vec::new(),
            },
            TransformationRepr::Full {
                function,
                dependencies,
            } => Transformation {
                function,
                dependencies,
            },
        }
    }
}

impl Transformation {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// A schema node together with its modifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    #[serde(rename = "type", deserialize_with = "deserialize_node")]
    pub node: SchemaNode,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,
    /// Substituted when the value is absent, then validated.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
    /// Returned instead of failing when validation fails.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub catch: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refinements: Vec<Refinement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<Transformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe: Option<Box<SchemaDefinition>>,
}

impl From<SchemaNode> for SchemaDefinition {
    fn from(node: SchemaNode) -> Self {
        SchemaDefinition::new(node)
    }
}

impl SchemaDefinition {
    /// A definition with no modifiers.
    pub fn new(node: SchemaNode) -> Self {
        Self {
            node,
            optional: false,
            nullable: false,
            default: None,
            catch: None,
            description: None,
            refinements: Vec::new(),
            transformations: Vec::new(),
            brand: None,
            pipe: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_catch(mut self, value: Value) -> Self {
        self.catch = Some(value);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn refine(mut self, refinement: Refinement) -> Self {
        self.refinements.push(refinement);
        self
    }

    pub fn transform(mut self, transformation: Transformation) -> Self {
        self.transformations.push(transformation);
        self
    }

    pub fn brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn pipe(mut self, next: SchemaDefinition) -> Self {
        self.pipe = Some(Box::new(next));
        self
    }

    /// Verify the structural invariants of the whole tree.
    ///
    /// Fails on the first violation found in depth-first order, before any
    /// compilation takes place.
    pub fn check(&self) -> Result<(), MalformedSchema> {
        self.check_at("")
    }

    pub(crate) fn check_at(&self, path: &str) -> Result<(), MalformedSchema> {
        let node_path = format!("{}/type", path);
        check_node(&self.node, &node_path)?;

        for (i, refinement) in self.refinements.iter().enumerate() {
            if refinement.function.trim().is_empty() {
                return Err(MalformedSchema::InvalidDefinition {
                    path: format!("{}/refinements/{}", path, i),
                    message: "refinement must name a function".into(),
                });
            }
        }
        for (i, transformation) in self.transformations.iter().enumerate() {
            if transformation.function.trim().is_empty() {
                return Err(MalformedSchema::InvalidDefinition {
                    path: format!("{}/transformations/{}", path, i),
                    message: "transformation must name a function".into(),
                });
            }
        }

        for (segment, child) in self.node.children() {
            child.check_at(&format!("{}{}", node_path, segment))?;
        }

        if let Some(next) = &self.pipe {
            next.check_at(&format!("{}/pipe", path))?;
        }
        Ok(())
    }
}

fn check_node(node: &SchemaNode, path: &str) -> Result<(), MalformedSchema> {
    match node {
        SchemaNode::Enum { values } => {
            if values.is_empty() {
                return Err(MalformedSchema::EmptyEnum { path: path.into() });
            }
            if let Some(i) = values
                .iter()
                .position(|v| !(v.is_string() || v.is_number()))
            {
                return Err(MalformedSchema::InvalidDefinition {
                    path: format!("{}/values/{}", path, i),
                    message: "enum values must be strings or numbers".into(),
                });
            }
        }
        SchemaNode::Union { options } if options.len() < 2 => {
            return Err(MalformedSchema::TooFewMembers {
                path: path.into(),
                kind: "union",
                min: 2,
                actual: options.len(),
            });
        }
        SchemaNode::Intersection { types } if types.len() < 2 => {
            return Err(MalformedSchema::TooFewMembers {
                path: path.into(),
                kind: "intersection",
                min: 2,
                actual: types.len(),
            });
        }
        SchemaNode::InstanceOf { class_name } if class_name.trim().is_empty() => {
            return Err(MalformedSchema::InvalidDefinition {
                path: path.into(),
                message: "instanceof must name a type".into(),
            });
        }
        SchemaNode::Lazy { getter } if getter.trim().is_empty() => {
            return Err(MalformedSchema::InvalidDefinition {
                path: path.into(),
                message: "lazy must name a getter".into(),
            });
        }
        _ => {}
    }
    Ok(())
}
