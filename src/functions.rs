//! Named code that definitions refer to.
//!
//! Definitions are data and never carry executable code. Refinements,
//! transformations, `instanceof` types, `lazy` getters and `function` values
//! name entries in a [`FunctionRegistry`] that the caller fills in before
//! compiling; the compiler rejects names that are not registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::definition::SchemaDefinition;
use crate::error::{Issue, IssueCode};
use crate::types::join_pointer;

/// Boolean check used by `refine` refinements.
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Callback used by `superRefine` refinements.
pub type SuperRefinement = Arc<dyn Fn(&Value, &mut RefinementContext) + Send + Sync>;

/// Value mapping used by transformations and preprocess steps.
pub type Mapping = Arc<dyn Fn(Value, &TransformContext) -> Value + Send + Sync>;

/// Membership test for an `instanceof` type.
pub type TypeCheck = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Produces the definition a `lazy` node stands for.
pub type Getter = Arc<dyn Fn() -> SchemaDefinition + Send + Sync>;

/// A registered function with a fixed arity, callable through `function` nodes.
#[derive(Clone)]
pub struct Callable {
    arity: usize,
    body: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

impl Callable {
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.body)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Collects issues raised by a super-refinement.
#[derive(Debug)]
pub struct RefinementContext {
    path: String,
    issues: Vec<Issue>,
}

impl RefinementContext {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            issues: Vec::new(),
        }
    }

    /// Path of the value being refined.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Report an issue on the refined value itself.
    pub fn add_issue(&mut self, message: impl Into<String>) {
        self.issues
            .push(Issue::new(self.path.clone(), IssueCode::Custom, message));
    }

    /// Report an issue on a field below the refined value.
    pub fn add_issue_at(&mut self, field: &str, message: impl Into<String>) {
        self.issues.push(Issue::new(
            join_pointer(&self.path, field),
            IssueCode::Custom,
            message,
        ));
    }

    pub(crate) fn into_issues(self) -> Vec<Issue> {
        self.issues
    }
}

/// Values a mapping declared dependencies on.
#[derive(Debug, Default)]
pub struct TransformContext {
    dependencies: Map<String, Value>,
}

impl TransformContext {
    pub(crate) fn new(dependencies: Map<String, Value>) -> Self {
        Self { dependencies }
    }

    /// Value of a declared dependency, if the sibling field is present.
    pub fn dependency(&self, field: &str) -> Option<&Value> {
        self.dependencies.get(field)
    }

    pub fn dependencies(&self) -> &Map<String, Value> {
        &self.dependencies
    }
}

/// Registration table for everything a definition may reference by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    predicates: HashMap<String, Predicate>,
    super_refinements: HashMap<String, SuperRefinement>,
    mappings: HashMap<String, Mapping>,
    types: HashMap<String, TypeCheck>,
    getters: HashMap<String, Getter>,
    functions: HashMap<String, Callable>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-filled with the built-in set:
    ///
    /// | Name | Kind |
    /// |------|------|
    /// | `trim`, `toLowerCase`, `toUpperCase` | mapping (strings, others unchanged) |
    /// | `nonBlank` | predicate (string with non-whitespace content) |
    /// | `Array`, `Object`, `Date` | type |
    pub fn with_builtins() -> Self {
        fn map_str(f: fn(&str) -> String) -> impl Fn(Value, &TransformContext) -> Value {
            move |value, _| match value {
                Value::String(s) => Value::String(f(&s)),
                other => other,
            }
        }

        Self::new()
            .with_mapping("trim", map_str(|s| s.trim().to_string()))
            .with_mapping("toLowerCase", map_str(str::to_lowercase))
            .with_mapping("toUpperCase", map_str(str::to_uppercase))
            .with_predicate("nonBlank", |v| {
                v.as_str().is_some_and(|s| !s.trim().is_empty())
            })
            .with_type("Array", Value::is_array)
            .with_type("Object", Value::is_object)
            .with_type("Date", |v| {
                v.as_str()
                    .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            })
    }

    pub fn with_predicate<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn with_super_refinement<F>(mut self, name: impl Into<String>, refinement: F) -> Self
    where
        F: Fn(&Value, &mut RefinementContext) + Send + Sync + 'static,
    {
        self.super_refinements
            .insert(name.into(), Arc::new(refinement));
        self
    }

    pub fn with_mapping<F>(mut self, name: impl Into<String>, mapping: F) -> Self
    where
        F: Fn(Value, &TransformContext) -> Value + Send + Sync + 'static,
    {
        self.mappings.insert(name.into(), Arc::new(mapping));
        self
    }

    pub fn with_type<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.types.insert(name.into(), Arc::new(check));
        self
    }

    pub fn with_getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> SchemaDefinition + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, arity: usize, body: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(
            name.into(),
            Callable {
                arity,
                body: Arc::new(body),
            },
        );
        self
    }

    pub fn predicate(&self, name: &str) -> Option<&Predicate> {
        self.predicates.get(name)
    }

    pub fn super_refinement(&self, name: &str) -> Option<&SuperRefinement> {
        self.super_refinements.get(name)
    }

    pub fn mapping(&self, name: &str) -> Option<&Mapping> {
        self.mappings.get(name)
    }

    pub fn type_check(&self, name: &str) -> Option<&TypeCheck> {
        self.types.get(name)
    }

    pub fn getter(&self, name: &str) -> Option<&Getter> {
        self.getters.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Callable> {
        self.functions.get(name)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<V>(map: &HashMap<String, V>) -> Vec<&str> {
            let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        }

        f.debug_struct("FunctionRegistry")
            .field("predicates", &names(&self.predicates))
            .field("super_refinements", &names(&self.super_refinements))
            .field("mappings", &names(&self.mappings))
            .field("types", &names(&self.types))
            .field("getters", &names(&self.getters))
            .field("functions", &names(&self.functions))
            .finish()
    }
}
