//! Running compiled schemas against values.
//!
//! A [`Validator`] is cheap to clone and safe to share between threads; every
//! call to [`Validator::parse`] works on its own issue list, so validating the
//! same input twice yields the same result.
//!
//! Modifiers wrap a node from the inside out: base checks, refinements and
//! transformations first, then `nullable`, `optional`, `default`, `catch`,
//! `brand` and finally `pipe`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::compiler::{parse_date, Base, Check, Compiled, CompiledRefinement, Rule};
use crate::definition::SchemaDefinition;
use crate::error::{Issue, IssueCode, MalformedSchema, ReferenceKind, ValidateError};
use crate::functions::{Callable, FunctionRegistry, RefinementContext, TransformContext};
use crate::types::{join_pointer, json_type_name, UnknownKeys};

/// Compile `definition` and validate `value` in one step.
///
/// Prefer [`crate::compile`] when the same schema checks many values.
pub fn validate(
    definition: &SchemaDefinition,
    functions: &Arc<FunctionRegistry>,
    value: &Value,
) -> Result<Value, ValidateError> {
    crate::compiler::compile(definition, functions)?.validate(value)
}

/// An executable schema.
#[derive(Clone)]
pub struct Validator {
    root: Arc<Compiled>,
    functions: Arc<FunctionRegistry>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("description", &self.root.description)
            .field("brand", &self.root.brand)
            .finish_non_exhaustive()
    }
}

impl Validator {
    pub(crate) fn new(root: Arc<Compiled>, functions: Arc<FunctionRegistry>) -> Self {
        Self { root, functions }
    }

    /// Validate a possibly absent value.
    ///
    /// `None` stands for a missing value; it is accepted by optional schemas,
    /// replaced by a default, or reported as `Required`. On success the
    /// returned value has defaults applied, unknown object keys handled and
    /// transformations run.
    pub fn parse(&self, value: Option<&Value>) -> Result<Option<Value>, ValidateError> {
        let mut run = Run::new(&self.functions);
        let result = run.run(&self.root, value, "");
        run.finish(result)
    }

    /// Validate a present value and return the transformed output.
    pub fn validate(&self, value: &Value) -> Result<Value, ValidateError> {
        self.parse(Some(value)).map(|output| output.unwrap_or(Value::Null))
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }

    pub fn description(&self) -> Option<&str> {
        self.root.description.as_deref()
    }

    /// Nominal tag of the schema. Branding never changes validation.
    pub fn brand(&self) -> Option<&str> {
        self.root.brand.as_deref()
    }

    /// Bind a registered callable to a `function` schema.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` when the schema is not a function schema,
    /// `UnresolvedReference` when `name` is not registered and
    /// `ArityMismatch` when the callable takes a different number of
    /// arguments than the schema declares.
    pub fn implement(&self, name: &str) -> Result<TypedFunction, MalformedSchema> {
        let Base::Function { args, .. } = &self.root.base else {
            return Err(not_a_function());
        };
        let callable = self
            .functions
            .function(name)
            .cloned()
            .ok_or_else(|| MalformedSchema::UnresolvedReference {
                path: "/type".into(),
                kind: ReferenceKind::Function,
                name: name.into(),
            })?;
        if callable.arity() != args.len() {
            return Err(MalformedSchema::ArityMismatch {
                path: "/type".into(),
                name: name.into(),
                expected: args.len(),
                actual: callable.arity(),
            });
        }
        Ok(TypedFunction {
            name: name.into(),
            validator: self.clone(),
            callable,
        })
    }
}

fn not_a_function() -> MalformedSchema {
    MalformedSchema::InvalidDefinition {
        path: "/type".into(),
        message: "only function schemas can be implemented".into(),
    }
}

/// A registered callable whose arguments and return value are validated.
#[derive(Debug, Clone)]
pub struct TypedFunction {
    name: String,
    validator: Validator,
    callable: Callable,
}

impl TypedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate `args`, call the function and validate its result.
    ///
    /// Argument issues are reported under `/args/<index>`, return value issues
    /// under `/return`, each list led by a summary issue.
    pub fn call(&self, args: &[Value]) -> Result<Value, ValidateError> {
        let Base::Function { args: params, returns } = &self.validator.root.base else {
            return Err(not_a_function().into());
        };
        if args.len() != params.len() {
            return Err(ValidateError::Invalid {
                issues: vec![Issue::new(
                    "",
                    IssueCode::InvalidArguments,
                    format!(
                        "Expected {} argument(s), received {}",
                        params.len(),
                        args.len()
                    ),
                )],
            });
        }

        let mut run = Run::new(&self.validator.functions);
        let mut validated = Vec::with_capacity(args.len());
        let mut failed = false;
        for (i, (param, arg)) in params.iter().zip(args).enumerate() {
            match run.run(param, Some(arg), &format!("/args/{}", i)) {
                Ok(output) => validated.push(output.unwrap_or(Value::Null)),
                Err(Failed) => failed = true,
            }
        }
        if failed {
            return Err(run.into_error(IssueCode::InvalidArguments, "Invalid function arguments"));
        }

        let result = self.callable.call(&validated);
        let mut run = Run::new(&self.validator.functions);
        match run.run(returns, Some(&result), "/return") {
            Ok(output) => Ok(output.unwrap_or(Value::Null)),
            Err(Failed) => Err(run.into_error(
                IssueCode::InvalidReturnType,
                "Invalid function return type",
            )),
        }
    }
}

/// Marker for a node that failed; its issues are already recorded.
#[derive(Debug)]
struct Failed;

type Step = Result<Option<Value>, Failed>;

/// State of a single validation call.
struct Run<'a> {
    functions: &'a FunctionRegistry,
    issues: Vec<Issue>,
    /// Sibling values of the innermost object whose fields declare
    /// transformation dependencies.
    scope: Vec<Map<String, Value>>,
    fatal: Option<MalformedSchema>,
}

impl<'a> Run<'a> {
    fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            functions,
            issues: Vec::new(),
            scope: Vec::new(),
            fatal: None,
        }
    }

    fn finish(self, result: Step) -> Result<Option<Value>, ValidateError> {
        if let Some(malformed) = self.fatal {
            return Err(malformed.into());
        }
        match result {
            Ok(output) if self.issues.is_empty() => Ok(output),
            _ => Err(ValidateError::Invalid {
                issues: self.issues,
            }),
        }
    }

    fn into_error(self, code: IssueCode, summary: &str) -> ValidateError {
        if let Some(malformed) = self.fatal {
            return malformed.into();
        }
        let mut issues = Vec::with_capacity(self.issues.len() + 1);
        issues.push(Issue::new("", code, summary));
        issues.extend(self.issues);
        ValidateError::Invalid { issues }
    }

    fn report(&mut self, path: &str, code: IssueCode, message: impl Into<String>) {
        self.issues.push(Issue::new(path, code, message));
    }

    fn fail(&mut self, path: &str, code: IssueCode, message: impl Into<String>) -> Failed {
        self.report(path, code, message);
        Failed
    }

    fn invalid_type(&mut self, expected: &str, value: &Value, path: &str) -> Failed {
        self.fail(
            path,
            IssueCode::InvalidType,
            format!("Expected {}, received {}", expected, json_type_name(value)),
        )
    }

    /// `pipe`, `catch` and `default`, outermost first.
    fn run(&mut self, node: &Compiled, value: Option<&Value>, path: &str) -> Step {
        let mark = self.issues.len();
        let result = match (value, &node.default) {
            (None, Some(default)) => self.run_inner(node, Some(default), path),
            _ => self.run_inner(node, value, path),
        };

        let output = match (result, &node.catch) {
            (Err(Failed), Some(fallback)) if self.fatal.is_none() => {
                self.issues.truncate(mark);
                Some(fallback.clone())
            }
            (result, _) => result?,
        };

        match &node.pipe {
            Some(next) => self.run(next, output.as_ref(), path),
            None => Ok(output),
        }
    }

    /// `optional` and `nullable`, then the node itself.
    fn run_inner(&mut self, node: &Compiled, value: Option<&Value>, path: &str) -> Step {
        match value {
            None if node.optional => return Ok(None),
            Some(Value::Null) if node.nullable => return Ok(Some(Value::Null)),
            _ => {}
        }

        let output = self.base(node, value, path)?;
        if let Some(value) = &output {
            self.refine(node, value, path)?;
        }
        Ok(output.map(|value| self.transform(node, value)))
    }

    fn base(&mut self, node: &Compiled, value: Option<&Value>, path: &str) -> Step {
        // Kinds that decide for themselves what absence means.
        match &node.base {
            Base::Undefined => {
                return match value {
                    None => Ok(None),
                    Some(v) => Err(self.invalid_type("undefined", v, path)),
                }
            }
            Base::Promise(inner) => return self.run(inner, value, path),
            Base::Lazy(lazy) => {
                let resolved = match lazy.resolve(self.functions) {
                    Ok(resolved) => resolved,
                    Err(malformed) => {
                        self.fatal.get_or_insert(malformed);
                        return Err(Failed);
                    }
                };
                return self.run(resolved, value, path);
            }
            Base::Union(options) => return self.union(options, value, path),
            Base::Intersection(members) => return self.intersection(members, value, path),
            _ => {}
        }

        let Some(value) = value else {
            return Err(self.fail(path, IssueCode::Required, "Required"));
        };

        match &node.base {
            Base::String(checks) => {
                let Value::String(s) = value else {
                    return Err(self.invalid_type("string", value, path));
                };
                self.apply_checks(checks, path, |rule| string_failure(rule, s))?;
            }
            Base::Number(checks) => {
                let Some(n) = value.as_f64() else {
                    return Err(self.invalid_type("number", value, path));
                };
                self.apply_checks(checks, path, |rule| number_failure(rule, n))?;
            }
            Base::Boolean => {
                if !value.is_boolean() {
                    return Err(self.invalid_type("boolean", value, path));
                }
            }
            Base::Date(checks) => {
                let date = match value {
                    Value::String(s) => parse_date(s),
                    other => return Err(self.invalid_type("date", other, path)),
                };
                let Some(date) = date else {
                    return Err(self.fail(path, IssueCode::InvalidDate, "Invalid date"));
                };
                self.apply_checks(checks, path, |rule| date_failure(rule, &date))?;
            }
            Base::BigInt => {
                if !is_bigint(value) {
                    return Err(self.invalid_type("bigint", value, path));
                }
            }
            Base::Symbol => {
                if !value.as_str().is_some_and(|s| !s.is_empty()) {
                    return Err(self.invalid_type("symbol", value, path));
                }
            }
            Base::Null => {
                if !value.is_null() {
                    return Err(self.invalid_type("null", value, path));
                }
            }
            Base::Array { element, checks } => {
                let Value::Array(items) = value else {
                    return Err(self.invalid_type("array", value, path));
                };
                let elements = self.elements(element, items, path);
                let sized = self.apply_checks(checks, path, |rule| size_failure(rule, items.len(), "Array"));
                let elements = elements?;
                sized?;
                return Ok(Some(Value::Array(elements)));
            }
            Base::Object {
                shape,
                unknown_keys,
            } => {
                let Value::Object(input) = value else {
                    return Err(self.invalid_type("object", value, path));
                };
                return self.object(shape, *unknown_keys, input, path);
            }
            Base::Enum(values) => {
                if !values.iter().any(|v| same_value(v, value)) {
                    let expected: Vec<String> = values.iter().map(quote).collect();
                    return Err(self.fail(
                        path,
                        IssueCode::InvalidEnumValue,
                        format!(
                            "invalid enum value. expected {}, received {}",
                            expected.join(" | "),
                            quote(value)
                        ),
                    ));
                }
            }
            Base::Function { args, .. } => {
                let functions = self.functions;
                let Some(name) = value.as_str() else {
                    return Err(self.invalid_type("function", value, path));
                };
                match functions.function(name) {
                    Some(callable) if callable.arity() == args.len() => {}
                    Some(callable) => {
                        return Err(self.fail(
                            path,
                            IssueCode::InvalidType,
                            format!(
                                "function \"{}\" takes {} argument(s), expected {}",
                                name,
                                callable.arity(),
                                args.len()
                            ),
                        ))
                    }
                    None => {
                        return Err(self.fail(
                            path,
                            IssueCode::InvalidType,
                            format!("unknown function \"{}\"", name),
                        ))
                    }
                }
            }
            Base::Literal(expected) => {
                if !same_value(value, expected) {
                    return Err(self.fail(
                        path,
                        IssueCode::InvalidLiteral,
                        format!("Invalid literal value, expected {}", expected),
                    ));
                }
            }
            Base::Record { key, value: entry } => {
                let Value::Object(input) = value else {
                    return Err(self.invalid_type("object", value, path));
                };
                return self.entries(key, entry, input, path).map(|m| Some(Value::Object(m)));
            }
            Base::Map { key, value: entry } => {
                return match value {
                    Value::Object(input) => self.entries(key, entry, input, path).map(|m| Some(Value::Object(m))),
                    Value::Array(pairs) => self.pairs(key, entry, pairs, path).map(|p| Some(Value::Array(p))),
                    other => Err(self.invalid_type("map", other, path)),
                };
            }
            Base::Set { element, checks } => {
                let Value::Array(items) = value else {
                    return Err(self.invalid_type("set", value, path));
                };
                let mut duplicate = false;
                for (i, item) in items.iter().enumerate() {
                    if items[..i].iter().any(|seen| same_value(seen, item)) {
                        self.report(
                            &format!("{}/{}", path, i),
                            IssueCode::DuplicateElement,
                            "Set elements must be unique",
                        );
                        duplicate = true;
                    }
                }
                let elements = self.elements(element, items, path);
                let sized = self.apply_checks(checks, path, |rule| size_failure(rule, items.len(), "Set"));
                let elements = elements?;
                sized?;
                if duplicate {
                    return Err(Failed);
                }
                return Ok(Some(Value::Array(elements)));
            }
            Base::InstanceOf { class_name, check } => {
                if !check(value) {
                    return Err(self.fail(
                        path,
                        IssueCode::InvalidType,
                        format!("Input not instance of {}", class_name),
                    ));
                }
            }
            Base::Undefined
            | Base::Promise(_)
            | Base::Lazy(_)
            | Base::Union(_)
            | Base::Intersection(_) => {}
        }
        Ok(Some(value.clone()))
    }

    /// Run every check, recording one issue per failed rule.
    fn apply_checks<F>(&mut self, checks: &[Check], path: &str, mut failure: F) -> Result<(), Failed>
    where
        F: FnMut(&Rule) -> Option<(IssueCode, String)>,
    {
        let mark = self.issues.len();
        for check in checks {
            if let Some((code, default)) = failure(&check.rule) {
                let message = check.message.clone().unwrap_or(default);
                self.report(path, code, message);
            }
        }
        if self.issues.len() > mark {
            Err(Failed)
        } else {
            Ok(())
        }
    }

    fn elements(&mut self, element: &Compiled, items: &[Value], path: &str) -> Result<Vec<Value>, Failed> {
        let mut output = Vec::with_capacity(items.len());
        let mut failed = false;
        for (i, item) in items.iter().enumerate() {
            match self.run(element, Some(item), &format!("{}/{}", path, i)) {
                Ok(value) => output.push(value.unwrap_or(Value::Null)),
                Err(Failed) => failed = true,
            }
        }
        if failed {
            Err(Failed)
        } else {
            Ok(output)
        }
    }

    fn object(
        &mut self,
        shape: &[(String, Compiled)],
        unknown_keys: UnknownKeys,
        input: &Map<String, Value>,
        path: &str,
    ) -> Step {
        let scoped = shape.iter().any(|(_, field)| {
            field
                .transformations
                .iter()
                .any(|t| !t.dependencies.is_empty())
        });
        if scoped {
            self.scope.push(input.clone());
        }

        let mut output = Map::new();
        let mut failed = false;
        for (key, field) in shape {
            match self.run(field, input.get(key), &join_pointer(path, key)) {
                Ok(Some(value)) => {
                    if scoped {
                        if let Some(siblings) = self.scope.last_mut() {
                            siblings.insert(key.clone(), value.clone());
                        }
                    }
                    output.insert(key.clone(), value);
                }
                Ok(None) => {}
                Err(Failed) => failed = true,
            }
        }

        if scoped {
            self.scope.pop();
        }

        let unknown: Vec<&String> = input
            .keys()
            .filter(|key| !shape.iter().any(|(declared, _)| declared == *key))
            .collect();
        match unknown_keys {
            UnknownKeys::Strip => {}
            UnknownKeys::Strict => {
                if !unknown.is_empty() {
                    let keys: Vec<String> = unknown.iter().map(|k| format!("'{}'", k)).collect();
                    self.report(
                        path,
                        IssueCode::UnrecognizedKeys,
                        format!("Unrecognized key(s) in object: {}", keys.join(", ")),
                    );
                    failed = true;
                }
            }
            UnknownKeys::Passthrough => {
                for key in unknown {
                    if let Some(value) = input.get(key) {
                        output.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        if failed {
            Err(Failed)
        } else {
            Ok(Some(Value::Object(output)))
        }
    }

    fn entries(
        &mut self,
        key: &Compiled,
        value: &Compiled,
        input: &Map<String, Value>,
        path: &str,
    ) -> Result<Map<String, Value>, Failed> {
        let mut output = Map::new();
        let mut failed = false;
        for (name, entry) in input {
            let entry_path = join_pointer(path, name);
            let key_out = self.run(key, Some(&Value::String(name.clone())), &entry_path);
            let value_out = self.run(value, Some(entry), &entry_path);
            match (key_out, value_out) {
                (Ok(key_out), Ok(value_out)) => {
                    let name = match key_out {
                        Some(Value::String(s)) => s,
                        _ => name.clone(),
                    };
                    if let Some(value_out) = value_out {
                        output.insert(name, value_out);
                    }
                }
                _ => failed = true,
            }
        }
        if failed {
            Err(Failed)
        } else {
            Ok(output)
        }
    }

    fn pairs(&mut self, key: &Compiled, value: &Compiled, pairs: &[Value], path: &str) -> Result<Vec<Value>, Failed> {
        let mut output = Vec::with_capacity(pairs.len());
        let mut failed = false;
        for (i, pair) in pairs.iter().enumerate() {
            let pair_path = format!("{}/{}", path, i);
            let Some([k, v]) = pair.as_array().map(Vec::as_slice) else {
                self.report(
                    &pair_path,
                    IssueCode::InvalidType,
                    format!("Expected [key, value] pair, received {}", json_type_name(pair)),
                );
                failed = true;
                continue;
            };
            let key_out = self.run(key, Some(k), &format!("{}/0", pair_path));
            let value_out = self.run(value, Some(v), &format!("{}/1", pair_path));
            match (key_out, value_out) {
                (Ok(k), Ok(v)) => output.push(Value::Array(vec![
                    k.unwrap_or(Value::Null),
                    v.unwrap_or(Value::Null),
                ])),
                _ => failed = true,
            }
        }
        if failed {
            Err(Failed)
        } else {
            Ok(output)
        }
    }

    /// First matching option wins; each option starts from a clean issue list.
    fn union(&mut self, options: &[Compiled], value: Option<&Value>, path: &str) -> Step {
        let mark = self.issues.len();
        for option in options {
            let result = self.run(option, value, path);
            self.issues.truncate(mark);
            match result {
                Ok(output) => return Ok(output),
                Err(Failed) if self.fatal.is_some() => return Err(Failed),
                Err(Failed) => {}
            }
        }
        Err(self.fail(
            path,
            IssueCode::InvalidUnion,
            format!(
                "invalid union: value did not match any of {} options",
                options.len()
            ),
        ))
    }

    fn intersection(&mut self, members: &[Compiled], value: Option<&Value>, path: &str) -> Step {
        let mut outputs = Vec::with_capacity(members.len());
        let mut failed = false;
        for member in members {
            match self.run(member, value, path) {
                Ok(output) => outputs.push(output),
                Err(Failed) => failed = true,
            }
        }
        if failed {
            return Err(Failed);
        }

        let mut merged: Option<Value> = None;
        for output in outputs {
            merged = match (merged, output) {
                (Some(left), Some(right)) => match merge(left, right) {
                    Some(value) => Some(value),
                    None => {
                        return Err(self.fail(
                            path,
                            IssueCode::InvalidIntersection,
                            "Intersection results could not be merged",
                        ))
                    }
                },
                (None, other) | (other, None) => other,
            };
        }
        Ok(merged)
    }

    fn refine(&mut self, node: &Compiled, value: &Value, path: &str) -> Result<(), Failed> {
        let mark = self.issues.len();
        for refinement in &node.refinements {
            match refinement {
                CompiledRefinement::Refine {
                    predicate,
                    message,
                    path: at,
                } => {
                    if !predicate(value) {
                        self.report(
                            &nested(path, at),
                            IssueCode::Custom,
                            message.as_deref().unwrap_or("Invalid input"),
                        );
                    }
                }
                CompiledRefinement::SuperRefine { refinement, path: at } => {
                    let mut ctx = RefinementContext::new(nested(path, at));
                    refinement(value, &mut ctx);
                    self.issues.extend(ctx.into_issues());
                }
            }
        }
        if self.issues.len() > mark {
            Err(Failed)
        } else {
            Ok(())
        }
    }

    fn transform(&self, node: &Compiled, value: Value) -> Value {
        node.transformations.iter().fold(value, |value, transformation| {
            let mut dependencies = Map::new();
            if let Some(siblings) = self.scope.last() {
                for field in &transformation.dependencies {
                    if let Some(sibling) = siblings.get(field) {
                        dependencies.insert(field.clone(), sibling.clone());
                    }
                }
            }
            (transformation.mapping)(value, &TransformContext::new(dependencies))
        })
    }
}

fn nested(path: &str, segments: &[String]) -> String {
    segments
        .iter()
        .fold(path.to_string(), |path, segment| join_pointer(&path, segment))
}

fn quote(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

/// Equality where numbers compare by value, so `1` and `1.0` match.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| same_value(v, w)))
        }
        _ => a == b,
    }
}

fn is_bigint(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        Value::String(s) => {
            let digits = s.strip_prefix('-').unwrap_or(s);
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

/// Merge the outputs of two intersection members.
fn merge(left: Value, right: Value) -> Option<Value> {
    match (left, right) {
        (Value::Object(mut left), Value::Object(right)) => {
            for (key, value) in right {
                match left.get_mut(&key) {
                    Some(existing) => {
                        let current = std::mem::take(existing);
                        *existing = merge(current, value)?;
                    }
                    None => {
                        left.insert(key, value);
                    }
                }
            }
            Some(Value::Object(left))
        }
        (Value::Array(left), Value::Array(right)) => {
            if left.len() != right.len() {
                return None;
            }
            left.into_iter()
                .zip(right)
                .map(|(a, b)| merge(a, b))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        }
        (left, right) if left == right => Some(left),
        _ => None,
    }
}

fn string_failure(rule: &Rule, s: &str) -> Option<(IssueCode, String)> {
    let len = s.chars().count();
    match rule {
        Rule::MinLength(n) if len < *n => Some((
            IssueCode::TooSmall,
            format!("String must contain at least {} character(s)", n),
        )),
        Rule::MaxLength(n) if len > *n => Some((
            IssueCode::TooBig,
            format!("String must contain at most {} character(s)", n),
        )),
        Rule::Length(n) if len != *n => Some((
            if len < *n {
                IssueCode::TooSmall
            } else {
                IssueCode::TooBig
            },
            format!("String must contain exactly {} character(s)", n),
        )),
        Rule::Format { name, validator } if !validator.is_valid(&Value::String(s.to_string())) => {
            Some((IssueCode::InvalidString, format!("Invalid {}", name)))
        }
        Rule::Regex(regex) if !regex.is_match(s) => Some((IssueCode::InvalidString, "Invalid".into())),
        Rule::Includes { value, position } => {
            let found = match position {
                Some(p) => s.chars().skip(*p).collect::<String>().contains(value.as_str()),
                None => s.contains(value.as_str()),
            };
            match (found, position) {
                (true, _) => None,
                (false, Some(p)) => Some((
                    IssueCode::InvalidString,
                    format!(
                        "Invalid input: must include \"{}\" at one or more positions greater than or equal to {}",
                        value, p
                    ),
                )),
                (false, None) => Some((
                    IssueCode::InvalidString,
                    format!("Invalid input: must include \"{}\"", value),
                )),
            }
        }
        Rule::StartsWith(prefix) if !s.starts_with(prefix.as_str()) => Some((
            IssueCode::InvalidString,
            format!("Invalid input: must start with \"{}\"", prefix),
        )),
        Rule::EndsWith(suffix) if !s.ends_with(suffix.as_str()) => Some((
            IssueCode::InvalidString,
            format!("Invalid input: must end with \"{}\"", suffix),
        )),
        _ => None,
    }
}

fn number_failure(rule: &Rule, n: f64) -> Option<(IssueCode, String)> {
    match rule {
        Rule::Min(min) if n < *min => Some((
            IssueCode::TooSmall,
            format!("Number must be greater than or equal to {}", min),
        )),
        Rule::Max(max) if n > *max => Some((
            IssueCode::TooBig,
            format!("Number must be less than or equal to {}", max),
        )),
        Rule::Int if n.fract() != 0.0 => Some((
            IssueCode::InvalidType,
            "Expected integer, received float".into(),
        )),
        Rule::Positive if n <= 0.0 => Some((
            IssueCode::TooSmall,
            "Number must be greater than 0".into(),
        )),
        Rule::Negative if n >= 0.0 => Some((
            IssueCode::TooBig,
            "Number must be less than 0".into(),
        )),
        Rule::MultipleOf(step) => {
            let ratio = n / step;
            if (ratio - ratio.round()).abs() < 1e-9 {
                None
            } else {
                Some((
                    IssueCode::InvalidNumber,
                    format!("Number must be a multiple of {}", step),
                ))
            }
        }
        _ => None,
    }
}

fn date_failure(rule: &Rule, date: &DateTime<Utc>) -> Option<(IssueCode, String)> {
    let display = |bound: &DateTime<Utc>| bound.to_rfc3339_opts(SecondsFormat::Secs, true);
    match rule {
        Rule::NotBefore(bound) if date < bound => Some((
            IssueCode::TooSmall,
            format!("Date must be greater than or equal to {}", display(bound)),
        )),
        Rule::NotAfter(bound) if date > bound => Some((
            IssueCode::TooBig,
            format!("Date must be smaller than or equal to {}", display(bound)),
        )),
        _ => None,
    }
}

fn size_failure(rule: &Rule, len: usize, subject: &str) -> Option<(IssueCode, String)> {
    match rule {
        Rule::MinLength(n) if len < *n => Some((
            IssueCode::TooSmall,
            format!("{} must contain at least {} element(s)", subject, n),
        )),
        Rule::MaxLength(n) if len > *n => Some((
            IssueCode::TooBig,
            format!("{} must contain at most {} element(s)", subject, n),
        )),
        Rule::Length(n) if len != *n => Some((
            if len < *n {
                IssueCode::TooSmall
            } else {
                IssueCode::TooBig
            },
            format!("{} must contain exactly {} element(s)", subject, n),
        )),
        Rule::NonEmpty if len == 0 => Some((
            IssueCode::TooSmall,
            format!("{} must contain at least 1 element(s)", subject),
        )),
        _ => None,
    }
}
