//! Error types for schema compilation, validation and the artifact registry.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Render a definition path for messages; the root pointer is empty.
fn at(path: &str) -> &str {
    if path.is_empty() {
        "(root)"
    } else {
        path
    }
}

/// Kind of externally registered code a definition refers to by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Predicate,
    Refinement,
    Mapping,
    Type,
    Getter,
    Function,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceKind::Predicate => "predicate",
            ReferenceKind::Refinement => "refinement",
            ReferenceKind::Mapping => "mapping",
            ReferenceKind::Type => "type",
            ReferenceKind::Getter => "getter",
            ReferenceKind::Function => "function",
        };
        f.write_str(name)
    }
}

/// A schema definition that cannot be compiled.
///
/// Every variant carries `path`, a JSON Pointer into the definition document
/// naming the offending node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedSchema {
    #[error("malformed schema at {}: enum must declare at least one value", at(.path))]
    EmptyEnum { path: String },

    #[error(
        "malformed schema at {}: {kind} requires at least {min} members, got {actual}",
        at(.path)
    )]
    TooFewMembers {
        path: String,
        kind: &'static str,
        min: usize,
        actual: usize,
    },

    #[error("malformed schema at {}: unknown {kind} \"{name}\"", at(.path))]
    UnresolvedReference {
        path: String,
        kind: ReferenceKind,
        name: String,
    },

    #[error("malformed schema at {}: invalid rule: {message}", at(.path))]
    InvalidRule { path: String, message: String },

    #[error(
        "malformed schema at {}: function \"{name}\" takes {actual} argument(s) but the schema declares {expected}",
        at(.path)
    )]
    ArityMismatch {
        path: String,
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed schema at {}: {message}", at(.path))]
    InvalidDefinition { path: String, message: String },
}

impl MalformedSchema {
    /// JSON Pointer of the offending node within the definition.
    pub fn path(&self) -> &str {
        match self {
            Self::EmptyEnum { path }
            | Self::TooFewMembers { path, .. }
            | Self::UnresolvedReference { path, .. }
            | Self::InvalidRule { path, .. }
            | Self::ArityMismatch { path, .. }
            | Self::InvalidDefinition { path, .. } => path,
        }
    }

    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Machine-readable classification of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidType,
    Required,
    TooSmall,
    TooBig,
    InvalidString,
    InvalidNumber,
    InvalidDate,
    InvalidEnumValue,
    InvalidLiteral,
    InvalidUnion,
    InvalidIntersection,
    UnrecognizedKeys,
    DuplicateElement,
    InvalidArguments,
    InvalidReturnType,
    Custom,
}

/// Single validation issue with path context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// JSON Pointer (RFC 6901) to the invalid value.
    pub path: String,
    pub code: IssueCode,
    /// Human-readable error message.
    pub message: String,
}

impl Issue {
    pub fn new(path: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

/// Errors while running a compiled validator.
#[derive(Debug, Clone, Error)]
pub enum ValidateError {
    /// A lazily resolved part of the schema turned out to be malformed.
    #[error(transparent)]
    Malformed(#[from] MalformedSchema),

    #[error("validation failed with {} issue(s)", issues.len())]
    Invalid { issues: Vec<Issue> },
}

impl ValidateError {
    /// Issues reported by the validator, empty for `Malformed`.
    pub fn issues(&self) -> &[Issue] {
        match self {
            ValidateError::Invalid { issues } => issues,
            ValidateError::Malformed(_) => &[],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Malformed(e) => e.exit_code(),
            ValidateError::Invalid { .. } => 1,
        }
    }
}

/// Key used for a registry lookup that found nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    Id(Uuid),
    Active { name: String },
    Revision { name: String, revision: u32 },
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Id(id) => write!(f, "schema with id \"{}\"", id),
            LookupKey::Active { name } => write!(f, "active schema \"{}\"", name),
            LookupKey::Revision { name, revision } => {
                write!(f, "schema \"{}\" revision {}", name, revision)
            }
        }
    }
}

/// More than one revision of the same name is marked active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyViolation {
    pub name: String,
    /// Active revisions, highest first.
    pub active_revisions: Vec<u32>,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revisions: Vec<String> = self
            .active_revisions
            .iter()
            .map(|r| r.to_string())
            .collect();
        write!(
            f,
            "schema \"{}\" has {} active revisions: {}",
            self.name,
            self.active_revisions.len(),
            revisions.join(", ")
        )
    }
}

/// Errors raised by an artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact {0} already exists")]
    DuplicateId(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StoreError::Io { .. } | StoreError::Unavailable(_) => 3,
            StoreError::Corrupt { .. } | StoreError::DuplicateId(_) => 2,
        }
    }
}

/// Errors from registry and access API operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} not found")]
    NotFound(LookupKey),

    #[error("invalid input: {field} {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    #[error(transparent)]
    Malformed(#[from] MalformedSchema),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RegistryError::NotFound(_) => 4,
            RegistryError::InvalidInput { .. } => 2,
            RegistryError::Malformed(e) => e.exit_code(),
            RegistryError::Store(e) => e.exit_code(),
        }
    }
}

/// Errors while loading JSON documents and definitions.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {what}: {source}")]
    InvalidDefinition {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}
