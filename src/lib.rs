//! Form Schema
//!
//! Compiles declarative, JSON-serializable schema definitions into validators
//! and keeps them in a versioned registry.
//!
//! A [`SchemaDefinition`] describes a value the way a form library would: a
//! node kind (string, object, union, lazy, ...) plus modifiers such as
//! `optional`, `default`, refinements and transformations. Refinements,
//! transformations, instance types and lazy getters refer to code by name;
//! the names are resolved against a [`FunctionRegistry`] at compile time.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use form_schema::{compile, FunctionRegistry, SchemaDefinition};
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
//! let functions = Arc::new(FunctionRegistry::with_builtins());
//! let validator = compile(&definition, &functions).unwrap();
//!
//! assert!(validator.is_valid(&json!({ "email": "ada@example.com" })));
//!
//! let err = validator.validate(&json!({ "email": "nope" })).unwrap_err();
//! assert_eq!(err.issues()[0].path, "/email");
//! assert_eq!(err.issues()[0].message, "Invalid email");
//! ```
//!
//! # Registry
//!
//! Stored schemas are [`SchemaArtifact`]s: one record per revision of a
//! name, with at most one active revision per name. [`SchemaService`] is the
//! access API over a [`Registry`] and an [`ArtifactStore`]:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `create` | New revision (`max + 1`), active; siblings deactivated |
//! | `activate` | Target active; every other revision of the name inactive |
//! | `deactivate` | Target inactive; nothing else changes |
//! | `publish` / `unpublish` | Toggle the published flag only |
//! | `remove` | Delete one revision; no other revision is re-activated |

mod artifact;
mod compiler;
mod definition;
mod error;
mod form;
mod functions;
mod linter;
mod loader;
mod registry;
mod service;
mod store;
mod types;
mod validator;

pub use artifact::{ArtifactFilter, ArtifactPatch, CreateSchemaInput, FormView, SchemaArtifact};
pub use compiler::{compile, compile_with};
pub use definition::{
    Bound, DateRules, Flag, Includes, LengthRules, NumberRules, Pattern, Refinement,
    RefinementKind, SchemaDefinition, SchemaNode, Shape, StringRules, Transformation,
};
pub use error::{
    ConsistencyViolation, Issue, IssueCode, LoadError, LookupKey, MalformedSchema,
    ReferenceKind, RegistryError, StoreError, ValidateError,
};
pub use form::{ConditionalDisplay, FieldValidation, FormWidgetConfig, SelectOption, WidgetType};
pub use functions::{
    Callable, FunctionRegistry, Getter, Mapping, Predicate, RefinementContext, SuperRefinement,
    TransformContext, TypeCheck,
};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{
    is_url, load_definition, load_input, load_json, load_json_auto, load_json_str, load_text,
    load_text_auto, parse_definition, parse_input,
};
pub use registry::Registry;
pub use service::{CompiledSchema, SchemaService};
pub use store::{ArtifactStore, FileStore, MemoryStore, StoreGuard};
pub use types::{json_type_name, CompileOptions, UnknownKeys};
pub use validator::{validate, TypedFunction, Validator};

#[cfg(feature = "remote")]
pub use loader::{load_json_url, load_text_url};
