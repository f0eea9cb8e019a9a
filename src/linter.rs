//! Schema linting - static analysis of definition and create-input files.
//!
//! Checks each file for:
//! - JSON syntax errors
//! - Documents that are not a definition or create input
//! - Malformed schemas and unregistered function names
//! - Form configuration that does not line up with the root object shape

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::definition::{SchemaDefinition, SchemaNode};
use crate::error::{LoadError, MalformedSchema};
use crate::form::FormWidgetConfig;
use crate::functions::FunctionRegistry;
use crate::loader::{load_json_str, load_text, parse_definition, parse_input};
use crate::service::CompiledSchema;
use crate::types::{join_pointer, CompileOptions};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON path to the issue (e.g., "/definition/type/shape/email")
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(code: &str, file: &Path, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            file: file.to_path_buf(),
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(code: &str, file: &Path, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, file, path, message)
        }
    }
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a file or directory.
///
/// If path is a directory, recursively finds all .json files.
/// If `strict` is true, warnings are treated as errors.
/// Names are resolved against `functions`.
pub fn lint(path: &Path, strict: bool, functions: &Arc<FunctionRegistry>) -> LintResult {
    let files = collect_schema_files(path);
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for file in &files {
        let file_result = lint_file(file, path, functions);
        total_errors += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        total_warnings += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    tracing::debug!(path = %path.display(), files = files.len(), failed, "lint finished");
    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

/// Lint a single file.
///
/// A document with a `definition` (or `zodSchema`) key is read as a create
/// input; anything else as a bare definition.
pub fn lint_file(file: &Path, base_path: &Path, functions: &Arc<FunctionRegistry>) -> FileResult {
    let document = load_text(file).and_then(|text| load_json_str(&text).map(|doc| (text, doc)));
    let diagnostics = match document {
        Ok((text, document)) => check_document(&text, &document, file, functions),
        Err(e) => vec![Diagnostic::error("E001", file, "/", format!("syntax error: {}", e))],
    };

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status,
        diagnostics,
    }
}

fn is_create_input(document: &Value) -> bool {
    document.get("definition").is_some() || document.get("zodSchema").is_some()
}

fn check_document(
    text: &str,
    document: &Value,
    file: &Path,
    functions: &Arc<FunctionRegistry>,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if !is_create_input(document) {
        match parse_definition(text) {
            Ok(definition) => {
                let result = CompiledSchema::build(
                    &definition,
                    None,
                    None,
                    functions,
                    &CompileOptions::default(),
                );
                if let Err(e) = result {
                    diagnostics.push(malformed(&e, file, ""));
                }
            }
            Err(e) => diagnostics.push(structure(&e, file)),
        }
        return diagnostics;
    }

    let key = if document.get("definition").is_some() {
        "/definition"
    } else {
        "/zodSchema"
    };
    let input = match parse_input(text) {
        Ok(input) => input,
        Err(e) => {
            diagnostics.push(structure(&e, file));
            return diagnostics;
        }
    };

    let result = CompiledSchema::build(
        &input.definition,
        input.transformers.as_ref(),
        input.preprocess.as_ref(),
        functions,
        &CompileOptions::default(),
    );
    if let Err(e) = result {
        // Artifact-level steps report paths from the document root.
        let prefix = if e.path().starts_with("/preprocess") || e.path().starts_with("/transformers") {
            ""
        } else {
            key
        };
        diagnostics.push(malformed(&e, file, prefix));
    }

    check_form_config(&input.definition, &input.form_config, file, &mut diagnostics);
    diagnostics
}

fn structure(e: &LoadError, file: &Path) -> Diagnostic {
    Diagnostic::error("E002", file, "/", e.to_string())
}

fn malformed(e: &MalformedSchema, file: &Path, prefix: &str) -> Diagnostic {
    let code = match e {
        MalformedSchema::UnresolvedReference { .. } => "E004",
        _ => "E003",
    };
    let path = format!("{}{}", prefix, e.path());
    let path = if path.is_empty() { "/".to_string() } else { path };
    Diagnostic::error(code, file, path, e.to_string())
}

/// Compare form configuration keys against the root object shape.
///
/// Definitions whose root is not an object carry no field names to check.
fn check_form_config(
    definition: &SchemaDefinition,
    form_config: &BTreeMap<String, FormWidgetConfig>,
    file: &Path,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let SchemaNode::Object { shape } = &definition.node else {
        return;
    };

    for (field, config) in form_config {
        let config_path = join_pointer("/formConfig", field);
        if !shape.contains_key(field) {
            diagnostics.push(Diagnostic::warning(
                "W001",
                file,
                config_path.clone(),
                format!("formConfig entry \"{}\" has no field in the schema", field),
            ));
        }
        if let Some(display) = &config.conditional_display {
            if !shape.contains_key(&display.field) {
                diagnostics.push(Diagnostic::warning(
                    "W002",
                    file,
                    format!("{}/conditionalDisplay/field", config_path),
                    format!("conditionalDisplay refers to unknown field \"{}\"", display.field),
                ));
            }
        }
    }

    for field in shape.keys().filter(|field| !form_config.contains_key(*field)) {
        diagnostics.push(Diagnostic::warning(
            "W003",
            file,
            join_pointer("/formConfig", field),
            format!("field \"{}\" has no formConfig entry", field),
        ));
    }
}

/// Collect all .json files in a path (file or directory).
fn collect_schema_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
}
