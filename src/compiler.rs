//! Schema compilation - turns a [`SchemaDefinition`] into an executable [`Validator`].
//!
//! Compilation walks the definition once, depth first. Every node becomes a
//! [`Compiled`] value holding its base check, its type-specific rules in
//! declaration order, resolved refinements and transformations, and its
//! modifiers. Names of registered code are resolved here, so a validator that
//! compiles never fails on a missing name later. `lazy` nodes are the one
//! exception to eager construction: they keep the resolved getter and compile
//! its definition on first use, which lets self-referential schemas compile
//! in bounded time.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{json, Value};

use crate::definition::{
    DateRules, LengthRules, NumberRules, RefinementKind, SchemaDefinition, SchemaNode, StringRules,
};
use crate::error::{MalformedSchema, ReferenceKind};
use crate::functions::{FunctionRegistry, Getter, Mapping, Predicate, SuperRefinement, TypeCheck};
use crate::types::{join_pointer, CompileOptions, UnknownKeys};
use crate::validator::Validator;

/// Compile a definition with default options.
///
/// # Errors
///
/// Returns `MalformedSchema` if the definition violates a structural
/// invariant, a rule parameter cannot be interpreted, or a referenced name is
/// not registered in `functions`.
pub fn compile(
    definition: &SchemaDefinition,
    functions: &Arc<FunctionRegistry>,
) -> Result<Validator, MalformedSchema> {
    compile_with(definition, functions, &CompileOptions::default())
}

/// Compile a definition with explicit options.
pub fn compile_with(
    definition: &SchemaDefinition,
    functions: &Arc<FunctionRegistry>,
    options: &CompileOptions,
) -> Result<Validator, MalformedSchema> {
    definition.check()?;
    let root = Compiler::new(functions, *options).build(definition, "")?;
    tracing::debug!(kind = definition.node.kind(), "compiled schema");
    Ok(Validator::new(Arc::new(root), Arc::clone(functions)))
}

/// A compiled definition node.
pub(crate) struct Compiled {
    pub(crate) base: Base,
    pub(crate) refinements: Vec<CompiledRefinement>,
    pub(crate) transformations: Vec<CompiledTransformation>,
    pub(crate) nullable: bool,
    pub(crate) optional: bool,
    pub(crate) default: Option<Value>,
    pub(crate) catch: Option<Value>,
    pub(crate) brand: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) pipe: Option<Box<Compiled>>,
}

pub(crate) enum Base {
    String(Vec<Check>),
    Number(Vec<Check>),
    Boolean,
    Date(Vec<Check>),
    BigInt,
    Symbol,
    Undefined,
    Null,
    Array {
        element: Box<Compiled>,
        checks: Vec<Check>,
    },
    Object {
        shape: Vec<(String, Compiled)>,
        unknown_keys: UnknownKeys,
    },
    Enum(Vec<Value>),
    Union(Vec<Compiled>),
    Intersection(Vec<Compiled>),
    Promise(Box<Compiled>),
    Function {
        args: Vec<Compiled>,
        returns: Box<Compiled>,
    },
    Literal(Value),
    Record {
        key: Box<Compiled>,
        value: Box<Compiled>,
    },
    Map {
        key: Box<Compiled>,
        value: Box<Compiled>,
    },
    Set {
        element: Box<Compiled>,
        checks: Vec<Check>,
    },
    InstanceOf {
        class_name: String,
        check: TypeCheck,
    },
    Lazy(Box<LazyNode>),
}

/// A type-specific rule with its optional custom message.
pub(crate) struct Check {
    pub(crate) rule: Rule,
    pub(crate) message: Option<String>,
}

pub(crate) enum Rule {
    MinLength(usize),
    MaxLength(usize),
    Length(usize),
    NonEmpty,
    Format {
        name: &'static str,
        validator: jsonschema::Validator,
    },
    Regex(Regex),
    Includes {
        value: String,
        position: Option<usize>,
    },
    StartsWith(String),
    EndsWith(String),
    Min(f64),
    Max(f64),
    Int,
    Positive,
    Negative,
    MultipleOf(f64),
    NotBefore(DateTime<Utc>),
    NotAfter(DateTime<Utc>),
}

pub(crate) enum CompiledRefinement {
    Refine {
        predicate: Predicate,
        message: Option<String>,
        path: Vec<String>,
    },
    SuperRefine {
        refinement: SuperRefinement,
        path: Vec<String>,
    },
}

pub(crate) struct CompiledTransformation {
    pub(crate) mapping: Mapping,
    pub(crate) dependencies: Vec<String>,
}

/// Deferred node; its definition is fetched and compiled on first use.
pub(crate) struct LazyNode {
    pub(crate) getter_name: String,
    getter: Getter,
    options: CompileOptions,
    path: String,
    resolved: OnceCell<Result<Compiled, MalformedSchema>>,
}

impl LazyNode {
    pub(crate) fn resolve(&self, functions: &FunctionRegistry) -> Result<&Compiled, MalformedSchema> {
        self.resolved
            .get_or_init(|| {
                tracing::trace!(getter = %self.getter_name, "resolving lazy schema");
                let definition = (self.getter)();
                definition.check_at(&self.path)?;
                let compiled = Compiler::new(functions, self.options).build(&definition, &self.path)?;
                // A lazy that yields another lazy never consumes input.
                if let Base::Lazy(inner) = &compiled.base {
                    return Err(MalformedSchema::InvalidDefinition {
                        path: self.path.clone(),
                        message: format!(
                            "getter '{}' resolves directly to lazy getter '{}'",
                            self.getter_name, inner.getter_name
                        ),
                    });
                }
                Ok(compiled)
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

/// Parse a date given as RFC 3339 or `YYYY-MM-DD` (midnight UTC).
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

struct Compiler<'a> {
    functions: &'a FunctionRegistry,
    options: CompileOptions,
}

impl<'a> Compiler<'a> {
    fn new(functions: &'a FunctionRegistry, options: CompileOptions) -> Self {
        Self { functions, options }
    }

    fn build(&self, definition: &SchemaDefinition, path: &str) -> Result<Compiled, MalformedSchema> {
        let base = self.base(&definition.node, &format!("{}/type", path))?;

        let refinements = definition
            .refinements
            .iter()
            .enumerate()
            .map(|(i, refinement)| {
                let at = format!("{}/refinements/{}", path, i);
                match refinement.kind {
                    RefinementKind::Refine => Ok(CompiledRefinement::Refine {
                        predicate: self
                            .functions
                            .predicate(&refinement.function)
                            .cloned()
                            .ok_or_else(|| unresolved(&at, ReferenceKind::Predicate, &refinement.function))?,
                        message: refinement.message.clone(),
                        path: refinement.path.clone(),
                    }),
                    RefinementKind::SuperRefine => Ok(CompiledRefinement::SuperRefine {
                        refinement: self
                            .functions
                            .super_refinement(&refinement.function)
                            .cloned()
                            .ok_or_else(|| {
                                unresolved(&at, ReferenceKind::Refinement, &refinement.function)
                            })?,
                        path: refinement.path.clone(),
                    }),
                }
            })
            .collect::<Result<Vec<_>, MalformedSchema>>()?;

        let transformations = definition
            .transformations
            .iter()
            .enumerate()
            .map(|(i, transformation)| {
                let at = format!("{}/transformations/{}", path, i);
                let mapping = self
                    .functions
                    .mapping(&transformation.function)
                    .cloned()
                    .ok_or_else(|| unresolved(&at, ReferenceKind::Mapping, &transformation.function))?;
                Ok(CompiledTransformation {
                    mapping,
                    dependencies: transformation.dependencies.clone(),
                })
            })
            .collect::<Result<Vec<_>, MalformedSchema>>()?;

        let pipe = match &definition.pipe {
            Some(next) => Some(Box::new(self.build(next, &format!("{}/pipe", path))?)),
            None => None,
        };

        Ok(Compiled {
            base,
            refinements,
            transformations,
            nullable: definition.nullable,
            optional: definition.optional,
            default: definition.default.clone(),
            catch: definition.catch.clone(),
            brand: definition.brand.clone(),
            description: definition.description.clone(),
            pipe,
        })
    }

    fn child(&self, definition: &SchemaDefinition, path: &str, segment: &str) -> Result<Box<Compiled>, MalformedSchema> {
        self.build(definition, &format!("{}/{}", path, segment)).map(Box::new)
    }

    fn members(
        &self,
        members: &[SchemaDefinition],
        path: &str,
        key: &'static str,
        kind: &'static str,
    ) -> Result<Vec<Compiled>, MalformedSchema> {
        if members.len() < 2 {
            return Err(MalformedSchema::TooFewMembers {
                path: path.into(),
                kind,
                min: 2,
                actual: members.len(),
            });
        }
        members
            .iter()
            .enumerate()
            .map(|(i, member)| self.build(member, &format!("{}/{}/{}", path, key, i)))
            .collect()
    }

    fn base(&self, node: &SchemaNode, path: &str) -> Result<Base, MalformedSchema> {
        let validation_path = format!("{}/validation", path);
        let base = match node {
            SchemaNode::String { validation } => Base::String(string_checks(validation, &validation_path)?),
            SchemaNode::Number { validation } => Base::Number(number_checks(validation, &validation_path)?),
            SchemaNode::Boolean => Base::Boolean,
            SchemaNode::Date { validation } => Base::Date(date_checks(validation, &validation_path)?),
            SchemaNode::BigInt => Base::BigInt,
            SchemaNode::Symbol => Base::Symbol,
            SchemaNode::Undefined => Base::Undefined,
            SchemaNode::Null => Base::Null,
            SchemaNode::Array {
                element_type,
                validation,
            } => Base::Array {
                element: self.child(element_type, path, "elementType")?,
                checks: length_checks(validation),
            },
            SchemaNode::Object { shape } => {
                let shape_path = format!("{}/shape", path);
                let fields = shape
                    .iter()
                    .map(|(key, definition)| {
                        self.build(definition, &join_pointer(&shape_path, key))
                            .map(|compiled| (key.to_string(), compiled))
                    })
                    .collect::<Result<Vec<_>, MalformedSchema>>()?;
                Base::Object {
                    shape: fields,
                    unknown_keys: self.options.unknown_keys,
                }
            }
            SchemaNode::Enum { values } => {
                if values.is_empty() {
                    return Err(MalformedSchema::EmptyEnum { path: path.into() });
                }
                Base::Enum(values.clone())
            }
            SchemaNode::Union { options } => Base::Union(self.members(options, path, "options", "union")?),
            SchemaNode::Intersection { types } => {
                Base::Intersection(self.members(types, path, "types", "intersection")?)
            }
            SchemaNode::Promise { value_type } => Base::Promise(self.child(value_type, path, "valueType")?),
            SchemaNode::Function { args, return_type } => Base::Function {
                args: args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| self.build(arg, &format!("{}/args/{}", path, i)))
                    .collect::<Result<Vec<_>, MalformedSchema>>()?,
                returns: self.child(return_type, path, "returnType")?,
            },
            SchemaNode::Literal { value } => Base::Literal(value.clone()),
            SchemaNode::Record {
                key_type,
                value_type,
            } => Base::Record {
                key: self.child(key_type, path, "keyType")?,
                value: self.child(value_type, path, "valueType")?,
            },
            SchemaNode::Map {
                key_type,
                value_type,
            } => Base::Map {
                key: self.child(key_type, path, "keyType")?,
                value: self.child(value_type, path, "valueType")?,
            },
            SchemaNode::Set {
                value_type,
                validation,
            } => Base::Set {
                element: self.child(value_type, path, "valueType")?,
                checks: length_checks(validation),
            },
            SchemaNode::InstanceOf { class_name } => Base::InstanceOf {
                class_name: class_name.clone(),
                check: self
                    .functions
                    .type_check(class_name)
                    .cloned()
                    .ok_or_else(|| unresolved(path, ReferenceKind::Type, class_name))?,
            },
            SchemaNode::Lazy { getter } => Base::Lazy(Box::new(LazyNode {
                getter_name: getter.clone(),
                getter: self
                    .functions
                    .getter(getter)
                    .cloned()
                    .ok_or_else(|| unresolved(path, ReferenceKind::Getter, getter))?,
                options: self.options,
                path: path.to_string(),
                resolved: OnceCell::new(),
            })),
        };
        Ok(base)
    }
}

fn unresolved(path: &str, kind: ReferenceKind, name: &str) -> MalformedSchema {
    MalformedSchema::UnresolvedReference {
        path: path.into(),
        kind,
        name: name.into(),
    }
}

fn check(rule: Rule, message: &Option<String>) -> Check {
    Check {
        rule,
        message: message.clone(),
    }
}

fn format_check(
    name: &'static str,
    format: &str,
    message: &Option<String>,
    path: &str,
) -> Result<Check, MalformedSchema> {
    let validator = jsonschema::options()
        .should_validate_formats(true)
        .build(&json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "format": format
        }))
        .map_err(|e| MalformedSchema::InvalidRule {
            path: path.into(),
            message: e.to_string(),
        })?;
    Ok(check(Rule::Format { name, validator }, message))
}

fn string_checks(rules: &StringRules, path: &str) -> Result<Vec<Check>, MalformedSchema> {
    let mut checks = Vec::new();
    if let Some(b) = &rules.min {
        checks.push(check(Rule::MinLength(b.value), &b.message));
    }
    if let Some(b) = &rules.max {
        checks.push(check(Rule::MaxLength(b.value), &b.message));
    }
    if let Some(b) = &rules.length {
        checks.push(check(Rule::Length(b.value), &b.message));
    }
    if let Some(f) = &rules.email {
        checks.push(format_check("email", "email", &f.message, &format!("{}/email", path))?);
    }
    if let Some(f) = &rules.url {
        checks.push(format_check("url", "uri", &f.message, &format!("{}/url", path))?);
    }
    if let Some(f) = &rules.uuid {
        checks.push(format_check("uuid", "uuid", &f.message, &format!("{}/uuid", path))?);
    }
    if let Some(p) = &rules.regex {
        let regex = Regex::new(&p.pattern).map_err(|e| MalformedSchema::InvalidRule {
            path: format!("{}/regex", path),
            message: e.to_string(),
        })?;
        checks.push(check(Rule::Regex(regex), &p.message));
    }
    if let Some(i) = &rules.includes {
        checks.push(check(
            Rule::Includes {
                value: i.value.clone(),
                position: i.position,
            },
            &i.message,
        ));
    }
    if let Some(b) = &rules.starts_with {
        checks.push(check(Rule::StartsWith(b.value.clone()), &b.message));
    }
    if let Some(b) = &rules.ends_with {
        checks.push(check(Rule::EndsWith(b.value.clone()), &b.message));
    }
    Ok(checks)
}

fn number_checks(rules: &NumberRules, path: &str) -> Result<Vec<Check>, MalformedSchema> {
    let mut checks = Vec::new();
    if let Some(b) = &rules.min {
        checks.push(check(Rule::Min(b.value), &b.message));
    }
    if let Some(b) = &rules.max {
        checks.push(check(Rule::Max(b.value), &b.message));
    }
    if let Some(f) = &rules.int {
        checks.push(check(Rule::Int, &f.message));
    }
    if let Some(f) = &rules.positive {
        checks.push(check(Rule::Positive, &f.message));
    }
    if let Some(f) = &rules.negative {
        checks.push(check(Rule::Negative, &f.message));
    }
    if let Some(b) = &rules.multiple_of {
        if b.value == 0.0 || !b.value.is_finite() {
            return Err(MalformedSchema::InvalidRule {
                path: format!("{}/multipleOf", path),
                message: format!("multipleOf must be a finite non-zero number, got {}", b.value),
            });
        }
        checks.push(check(Rule::MultipleOf(b.value), &b.message));
    }
    Ok(checks)
}

fn date_checks(rules: &DateRules, path: &str) -> Result<Vec<Check>, MalformedSchema> {
    let bound = |raw: &str, key: &str| {
        parse_date(raw).ok_or_else(|| MalformedSchema::InvalidRule {
            path: format!("{}/{}", path, key),
            message: format!("\"{}\" is not an RFC 3339 timestamp or YYYY-MM-DD date", raw),
        })
    };

    let mut checks = Vec::new();
    if let Some(b) = &rules.min {
        checks.push(check(Rule::NotBefore(bound(&b.value, "min")?), &b.message));
    }
    if let Some(b) = &rules.max {
        checks.push(check(Rule::NotAfter(bound(&b.value, "max")?), &b.message));
    }
    Ok(checks)
}

fn length_checks(rules: &LengthRules) -> Vec<Check> {
    let mut checks = Vec::new();
    if let Some(b) = &rules.min {
        checks.push(check(Rule::MinLength(b.value), &b.message));
    }
    if let Some(b) = &rules.max {
        checks.push(check(Rule::MaxLength(b.value), &b.message));
    }
    if let Some(b) = &rules.length {
        checks.push(check(Rule::Length(b.value), &b.message));
    }
    if let Some(f) = &rules.nonempty {
        checks.push(check(Rule::NonEmpty, &f.message));
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidateError;
    use serde_json::json;

    fn definition(value: Value) -> SchemaDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn builtins() -> Arc<FunctionRegistry> {
        Arc::new(FunctionRegistry::with_builtins())
    }

    #[test]
    fn compiles_every_node_kind() {
        let functions = Arc::new(
            FunctionRegistry::with_builtins()
                .with_getter("self", || SchemaDefinition::new(SchemaNode::string())),
        );
        let def = definition(json!({
            "type": { "type": "object", "shape": {
                "s": { "type": "string" },
                "n": { "type": "number" },
                "b": { "type": "boolean" },
                "d": { "type": "date" },
                "big": { "type": "bigint" },
                "sym": { "type": "symbol" },
                "u": { "type": "undefined" },
                "nil": { "type": "null" },
                "arr": { "type": { "type": "array", "elementType": { "type": "string" } } },
                "e": { "type": { "type": "enum", "values": ["a", "b"] } },
                "un": { "type": { "type": "union", "options": [{ "type": "string" }, { "type": "number" }] } },
                "it": { "type": { "type": "intersection", "types": [{ "type": "string" }, { "type": "string" }] } },
                "p": { "type": { "type": "promise", "valueType": { "type": "string" } } },
                "f": { "type": { "type": "function", "returnType": { "type": "string" } } },
                "l": { "type": { "type": "literal", "value": 1 } },
                "r": { "type": { "type": "record", "keyType": { "type": "string" }, "valueType": { "type": "number" } } },
                "m": { "type": { "type": "map", "keyType": { "type": "string" }, "valueType": { "type": "number" } } },
                "set": { "type": { "type": "set", "valueType": { "type": "string" } } },
                "io": { "type": { "type": "instanceof", "className": "Date" } },
                "lz": { "type": { "type": "lazy", "getter": "self" } }
            } }
        }));
        assert!(compile(&def, &functions).is_ok());
    }

    #[test]
    fn empty_enum_is_malformed() {
        let def = SchemaDefinition::new(SchemaNode::Enum { values: vec![] });
        let err = compile(&def, &builtins()).unwrap_err();
        assert_eq!(err, MalformedSchema::EmptyEnum { path: "/type".into() });
    }

    #[test]
    fn unknown_predicate_is_malformed() {
        let def = definition(json!({
            "type": "string",
            "refinements": [{ "type": "refine", "function": "isEven" }]
        }));
        let err = compile(&def, &builtins()).unwrap_err();
        assert_eq!(
            err,
            MalformedSchema::UnresolvedReference {
                path: "/refinements/0".into(),
                kind: ReferenceKind::Predicate,
                name: "isEven".into(),
            }
        );
    }

    #[test]
    fn unknown_type_and_getter_are_malformed() {
        let def = definition(json!({ "type": { "type": "instanceof", "className": "File" } }));
        assert!(matches!(
            compile(&def, &builtins()),
            Err(MalformedSchema::UnresolvedReference { kind: ReferenceKind::Type, .. })
        ));

        let def = definition(json!({ "type": { "type": "lazy", "getter": "tree" } }));
        assert!(matches!(
            compile(&def, &builtins()),
            Err(MalformedSchema::UnresolvedReference { kind: ReferenceKind::Getter, .. })
        ));
    }

    #[test]
    fn unknown_mapping_in_pipe_is_malformed() {
        let def = definition(json!({
            "type": "string",
            "pipe": { "type": "string", "transformations": ["slugify"] }
        }));
        let err = compile(&def, &builtins()).unwrap_err();
        assert_eq!(err.path(), "/pipe/transformations/0");
    }

    #[test]
    fn invalid_regex_is_malformed() {
        let def = definition(json!({
            "type": { "type": "string", "validation": { "regex": { "pattern": "([a-z" } } }
        }));
        let err = compile(&def, &builtins()).unwrap_err();
        assert!(matches!(err, MalformedSchema::InvalidRule { .. }));
        assert_eq!(err.path(), "/type/validation/regex");
    }

    #[test]
    fn zero_multiple_of_is_malformed() {
        let def = definition(json!({
            "type": { "type": "number", "validation": { "multipleOf": { "value": 0 } } }
        }));
        assert!(matches!(
            compile(&def, &builtins()),
            Err(MalformedSchema::InvalidRule { .. })
        ));
    }

    #[test]
    fn unparsable_date_bound_is_malformed() {
        let def = definition(json!({
            "type": { "type": "date", "validation": { "min": { "value": "last tuesday" } } }
        }));
        let err = compile(&def, &builtins()).unwrap_err();
        assert_eq!(err.path(), "/type/validation/min");
    }

    #[test]
    fn lazy_getter_is_not_called_at_compile_time() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let functions = Arc::new(FunctionRegistry::new().with_getter("node", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            SchemaDefinition::new(SchemaNode::lazy("node"))
        }));

        let def = SchemaDefinition::new(SchemaNode::lazy("node"));
        assert!(compile(&def, &functions).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn lazy_resolving_to_lazy_is_malformed() {
        let functions = Arc::new(
            FunctionRegistry::new()
                .with_getter("loop", || SchemaDefinition::new(SchemaNode::lazy("loop")).optional()),
        );
        let v = compile(&SchemaDefinition::new(SchemaNode::lazy("loop")), &functions).unwrap();

        match v.validate(&json!("x")) {
            Err(ValidateError::Malformed(MalformedSchema::InvalidDefinition { path, message })) => {
                assert_eq!(path, "/type");
                assert!(message.contains("'loop'"));
            }
            other => panic!("expected malformed lazy, got {:?}", other),
        }
    }

    #[test]
    fn parse_date_forms() {
        assert!(parse_date("2024-01-31").is_some());
        assert!(parse_date("2024-01-31T12:30:00+02:00").is_some());
        assert!(parse_date("31/01/2024").is_none());
        assert_eq!(
            parse_date("2024-01-31T00:00:00Z"),
            parse_date("2024-01-31")
        );
    }
}
