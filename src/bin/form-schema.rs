//! Form Schema CLI
//!
//! Command-line interface for checking definitions, validating submissions and
//! managing the schema registry.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use form_schema::{
    compile_with, lint, load_definition, load_input, load_json, CompileOptions, FileStatus,
    FileStore, FunctionRegistry, RegistryError, SchemaService, Severity, ValidateError,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "form-schema")]
#[command(about = "Compile, validate and version declarative form schemas")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Registry file
    #[arg(
        long,
        env = "FORM_SCHEMA_STORE",
        default_value = "form-schemas.json",
        global = true
    )]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a schema definition compiles
    Check {
        /// Definition source: file path or URL (http:// or https://)
        definition: String,
    },

    /// Validate a payload against a definition or a stored schema
    Validate {
        /// Payload file to validate
        payload: PathBuf,

        /// Definition source: file path or URL
        #[arg(long, conflicts_with = "id", required_unless_present = "id")]
        schema: Option<String>,

        /// Stored schema id (applies its preprocess and transformers)
        #[arg(long)]
        id: Option<Uuid>,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,

        /// Strict mode: reject unknown object keys
        #[arg(long)]
        strict: bool,
    },

    /// Lint definition and create-input files
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },

    /// Create a new revision from a create-input document
    Create {
        /// Input source: file path or URL
        input: String,
    },

    /// List the active revision of every schema
    List,

    /// Show a stored revision by id
    Get { id: Uuid },

    /// Show the active revision of a schema, or a specific revision
    Show {
        name: String,

        #[arg(long)]
        revision: Option<u32>,
    },

    /// List every revision of a schema, newest first
    Versions { name: String },

    /// Delete one revision
    Remove { id: Uuid },

    /// Mark a revision as published
    Publish { id: Uuid },

    /// Clear the published flag of a revision
    Unpublish { id: Uuid },

    /// Make a revision the active one for its name
    Activate { id: Uuid },

    /// Deactivate a revision
    Deactivate { id: Uuid },

    /// Print the definition and form configuration of a revision
    FormConfig { id: Uuid },

    /// Report schemas with more than one active revision
    Audit,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let functions = Arc::new(FunctionRegistry::with_builtins());
    let store = cli.store;

    let result = match cli.command {
        Commands::Check { definition } => run_check(&definition, &functions),

        Commands::Validate {
            payload,
            schema,
            id,
            json,
            strict,
        } => run_validate(ValidateArgs {
            payload,
            schema,
            id,
            json_output: json,
            strict,
            store: &store,
            functions: &functions,
        }),

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet, &functions),

        Commands::Create { input } => with_service(&store, &functions, |service| {
            let input = load_input(&input).map_err(|e| {
                eprintln!("Error: {}", e);
                e.exit_code() as u8
            })?;
            registry_output(service.create(input))
        }),
        Commands::List => with_service(&store, &functions, |s| registry_output(s.list())),
        Commands::Get { id } => with_service(&store, &functions, |s| registry_output(s.get(id))),
        Commands::Show { name, revision } => with_service(&store, &functions, |s| {
            registry_output(s.get_by_name(&name, revision))
        }),
        Commands::Versions { name } => {
            with_service(&store, &functions, |s| registry_output(s.all_versions(&name)))
        }
        Commands::Remove { id } => with_service(&store, &functions, |s| registry_output(s.remove(id))),
        Commands::Publish { id } => with_service(&store, &functions, |s| registry_output(s.publish(id))),
        Commands::Unpublish { id } => {
            with_service(&store, &functions, |s| registry_output(s.unpublish(id)))
        }
        Commands::Activate { id } => {
            with_service(&store, &functions, |s| registry_output(s.activate(id)))
        }
        Commands::Deactivate { id } => {
            with_service(&store, &functions, |s| registry_output(s.deactivate(id)))
        }
        Commands::FormConfig { id } => {
            with_service(&store, &functions, |s| registry_output(s.form_config(id)))
        }
        Commands::Audit => with_service(&store, &functions, |s| {
            let violations = s.registry().audit().map_err(registry_error)?;
            print_json(&violations)?;
            if violations.is_empty() {
                Ok(())
            } else {
                Err(1)
            }
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Log to stderr. `RUST_LOG` takes precedence over `-v`.
fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_service(
    store: &Path,
    functions: &Arc<FunctionRegistry>,
) -> Result<SchemaService<FileStore>, u8> {
    let store = FileStore::open(store).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    Ok(SchemaService::new(store, Arc::clone(functions)))
}

fn with_service<F>(store: &Path, functions: &Arc<FunctionRegistry>, run: F) -> Result<(), u8>
where
    F: FnOnce(&SchemaService<FileStore>) -> Result<(), u8>,
{
    run(&open_service(store, functions)?)
}

fn registry_error(e: RegistryError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn registry_output<T: Serialize>(result: Result<T, RegistryError>) -> Result<(), u8> {
    print_json(&result.map_err(registry_error)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), u8> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}

fn run_check(source: &str, functions: &Arc<FunctionRegistry>) -> Result<(), u8> {
    let definition = load_definition(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let validator = compile_with(&definition, functions, &CompileOptions::default()).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    match validator.description() {
        Some(description) => println!("Valid schema: {}", description),
        None => println!("Valid schema"),
    }
    Ok(())
}

struct ValidateArgs<'a> {
    payload: PathBuf,
    schema: Option<String>,
    id: Option<Uuid>,
    json_output: bool,
    strict: bool,
    store: &'a Path,
    functions: &'a Arc<FunctionRegistry>,
}

fn run_validate(args: ValidateArgs<'_>) -> Result<(), u8> {
    let ValidateArgs {
        payload: payload_path,
        schema,
        id,
        json_output,
        strict,
        store,
        functions,
    } = args;
    let options = CompileOptions::new().strict(strict);

    let payload = load_json(&payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;

    // Explicit definition, or a stored schema with its artifact-level steps.
    let result = match (schema, id) {
        (Some(source), _) => {
            let definition = load_definition(&source).map_err(|e| {
                report_error(json_output, &format!("loading schema: {}", e));
                e.exit_code() as u8
            })?;
            let validator = compile_with(&definition, functions, &options).map_err(|e| {
                report_error(json_output, &e.to_string());
                e.exit_code() as u8
            })?;
            validator.validate(&payload)
        }
        (None, Some(id)) => {
            let service = open_service(store, functions)?.with_options(options);
            let compiled = service.compiled_validator(id).map_err(|e| {
                report_error(json_output, &e.to_string());
                e.exit_code() as u8
            })?;
            compiled.validate(&payload)
        }
        (None, None) => {
            report_error(json_output, "either --schema or --id is required");
            return Err(2);
        }
    };

    match result {
        Ok(output) => {
            if json_output {
                println!("{}", json!({ "valid": true, "output": output }));
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Invalid { issues }) => {
            if json_output {
                println!("{}", json!({ "valid": false, "errors": issues }));
            } else {
                eprintln!("Validation failed:");
                for issue in issues {
                    eprintln!("  {}", issue);
                }
            }
            Err(1)
        }
        Err(ValidateError::Malformed(e)) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        let output: Value = json!({ "valid": false, "error": msg });
        println!("{}", output);
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_lint(
    path: &Path,
    format: &str,
    strict: bool,
    quiet: bool,
    functions: &Arc<FunctionRegistry>,
) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict, functions);

    if format == "json" {
        print_json(&result)?;
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.failed == 0 {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.failed == 0 {
        Ok(())
    } else {
        Err(1)
    }
}
