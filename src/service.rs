//! Access API over the registry and the compiler.
//!
//! [`SchemaService`] is what a transport layer calls into. It delegates to
//! the [`Registry`] and compiles stored definitions on demand; compiled
//! validators are never persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::artifact::{CreateSchemaInput, FormView, SchemaArtifact};
use crate::compiler::compile_with;
use crate::definition::{SchemaDefinition, Transformation};
use crate::error::{MalformedSchema, ReferenceKind, RegistryError, ValidateError};
use crate::functions::{FunctionRegistry, Mapping, TransformContext};
use crate::registry::Registry;
use crate::store::ArtifactStore;
use crate::types::{join_pointer, CompileOptions};
use crate::validator::Validator;

pub struct SchemaService<S> {
    registry: Registry<S>,
    functions: Arc<FunctionRegistry>,
    options: CompileOptions,
}

impl<S: ArtifactStore> SchemaService<S> {
    pub fn new(store: S, functions: Arc<FunctionRegistry>) -> Self {
        Self {
            registry: Registry::new(store),
            functions,
            options: CompileOptions::default(),
        }
    }

    /// Options applied by [`SchemaService::compiled_validator`].
    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Active revision of every name.
    pub fn list(&self) -> Result<Vec<SchemaArtifact>, RegistryError> {
        self.registry.list_active()
    }

    pub fn get(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.registry.get(id)
    }

    /// A specific revision, or the active one when `revision` is `None`.
    pub fn get_by_name(&self, name: &str, revision: Option<u32>) -> Result<SchemaArtifact, RegistryError> {
        match revision {
            Some(revision) => self.registry.find_by_revision(name, revision),
            None => self.registry.find_active(name),
        }
    }

    pub fn all_versions(&self, name: &str) -> Result<Vec<SchemaArtifact>, RegistryError> {
        self.registry.history(name)
    }

    pub fn create(&self, input: CreateSchemaInput) -> Result<SchemaArtifact, RegistryError> {
        self.registry.create(input)
    }

    pub fn remove(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.registry.remove(id)
    }

    pub fn publish(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.registry.publish(id)
    }

    pub fn unpublish(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.registry.unpublish(id)
    }

    pub fn activate(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.registry.activate(id)
    }

    pub fn deactivate(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.registry.deactivate(id)
    }

    /// Look up `id` and compile its definition with its preprocess and
    /// transformer steps.
    pub fn compiled_validator(&self, id: Uuid) -> Result<CompiledSchema, RegistryError> {
        let artifact = self.registry.get(id)?;
        let compiled = CompiledSchema::build(
            &artifact.definition,
            artifact.transformers.as_ref(),
            artifact.preprocess.as_ref(),
            &self.functions,
            &self.options,
        )?;
        tracing::debug!(%id, name = %artifact.name, revision = artifact.revision, "compiled stored schema");
        Ok(compiled)
    }

    /// Definition and form configuration, uncompiled.
    pub fn form_config(&self, id: Uuid) -> Result<FormView, RegistryError> {
        let artifact = self.registry.get(id)?;
        Ok(FormView {
            definition: artifact.definition,
            form_config: artifact.form_config,
        })
    }
}

struct FieldTransformer {
    field: String,
    mapping: Mapping,
    dependencies: Vec<String>,
}

/// A stored schema ready to validate form submissions.
///
/// Runs in three steps: preprocess mappings on the raw top-level fields,
/// the compiled definition, then per-field transformers on the output.
#[derive(Clone)]
pub struct CompiledSchema {
    validator: Validator,
    preprocess: Arc<Vec<(String, Mapping)>>,
    transformers: Arc<Vec<FieldTransformer>>,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("validator", &self.validator)
            .field(
                "preprocess",
                &self.preprocess.iter().map(|(field, _)| field).collect::<Vec<_>>(),
            )
            .field(
                "transformers",
                &self.transformers.iter().map(|t| &t.field).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CompiledSchema {
    /// Compile a definition together with artifact-level steps.
    ///
    /// # Errors
    ///
    /// Fails like [`crate::compile`], and with `UnresolvedReference` at
    /// `/preprocess/<field>` or `/transformers/<field>` for unknown mappings.
    pub fn build(
        definition: &SchemaDefinition,
        transformers: Option<&BTreeMap<String, Transformation>>,
        preprocess: Option<&BTreeMap<String, String>>,
        functions: &Arc<FunctionRegistry>,
        options: &CompileOptions,
    ) -> Result<Self, MalformedSchema> {
        let validator = compile_with(definition, functions, options)?;

        let lookup = |section: &str, field: &str, name: &str| {
            functions
                .mapping(name)
                .cloned()
                .ok_or_else(|| MalformedSchema::UnresolvedReference {
                    path: join_pointer(&format!("/{}", section), field),
                    kind: ReferenceKind::Mapping,
                    name: name.into(),
                })
        };

        let preprocess = preprocess
            .into_iter()
            .flatten()
            .map(|(field, name)| Ok((field.clone(), lookup("preprocess", field, name)?)))
            .collect::<Result<Vec<_>, MalformedSchema>>()?;
        let transformers = transformers
            .into_iter()
            .flatten()
            .map(|(field, t)| {
                Ok(FieldTransformer {
                    field: field.clone(),
                    mapping: lookup("transformers", field, &t.function)?,
                    dependencies: t.dependencies.clone(),
                })
            })
            .collect::<Result<Vec<_>, MalformedSchema>>()?;

        Ok(Self {
            validator,
            preprocess: Arc::new(preprocess),
            transformers: Arc::new(transformers),
        })
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validate a submission and return the transformed output.
    ///
    /// Preprocess and transformer steps only touch top-level fields of object
    /// values; other values pass through them unchanged.
    pub fn validate(&self, value: &Value) -> Result<Value, ValidateError> {
        let input = match value {
            Value::Object(fields) if !self.preprocess.is_empty() => {
                let mut fields = fields.clone();
                let none = TransformContext::default();
                for (field, mapping) in self.preprocess.iter() {
                    if let Some(raw) = fields.get_mut(field) {
                        let current = std::mem::take(raw);
                        *raw = mapping(current, &none);
                    }
                }
                Value::Object(fields)
            }
            other => other.clone(),
        };

        let output = self.validator.validate(&input)?;
        Ok(self.transform(output))
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }

    fn transform(&self, output: Value) -> Value {
        let Value::Object(mut fields) = output else {
            return output;
        };
        for transformer in self.transformers.iter() {
            let dependencies: Map<String, Value> = transformer
                .dependencies
                .iter()
                .filter_map(|dep| fields.get(dep).map(|v| (dep.clone(), v.clone())))
                .collect();
            if let Some(slot) = fields.get_mut(&transformer.field) {
                let current = std::mem::take(slot);
                *slot = (transformer.mapping)(current, &TransformContext::new(dependencies));
            }
        }
        Value::Object(fields)
    }
}
