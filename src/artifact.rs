//! Persisted schema records and the primitives stores are queried with.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{SchemaDefinition, Transformation};
use crate::form::FormWidgetConfig;

/// One revision of a named schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaArtifact {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Starts at 1 and increases by one per `create` for the same name.
    pub revision: u32,
    #[serde(alias = "zodSchema")]
    pub definition: SchemaDefinition,
    #[serde(default)]
    pub form_config: BTreeMap<String, FormWidgetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformers: Option<BTreeMap<String, Transformation>>,
    /// Field name to registered mapping, applied before validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub is_published: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a new revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchemaInput {
    pub name: String,
    pub description: String,
    #[serde(alias = "zodSchema")]
    pub definition: SchemaDefinition,
    #[serde(default)]
    pub form_config: BTreeMap<String, FormWidgetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformers: Option<BTreeMap<String, Transformation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub is_published: bool,
}

impl CreateSchemaInput {
    pub fn new(name: impl Into<String>, description: impl Into<String>, definition: SchemaDefinition) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            definition,
            form_config: BTreeMap::new(),
            transformers: None,
            preprocess: None,
            is_published: false,
        }
    }

    pub fn form_field(mut self, field: impl Into<String>, config: FormWidgetConfig) -> Self {
        self.form_config.insert(field.into(), config);
        self
    }

    pub fn transformer(mut self, field: impl Into<String>, transformation: Transformation) -> Self {
        self.transformers
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), transformation);
        self
    }

    pub fn preprocess(mut self, field: impl Into<String>, mapping: impl Into<String>) -> Self {
        self.preprocess
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), mapping.into());
        self
    }

    pub fn published(mut self, published: bool) -> Self {
        self.is_published = published;
        self
    }

    /// Build the stored record for `revision`, active and timestamped now.
    pub(crate) fn into_artifact(self, revision: u32) -> SchemaArtifact {
        let now = Utc::now();
        SchemaArtifact {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            revision,
            definition: self.definition,
            form_config: self.form_config,
            transformers: self.transformers,
            preprocess: self.preprocess,
            is_published: self.is_published,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Definition plus presentation metadata, as handed to form renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormView {
    pub definition: SchemaDefinition,
    pub form_config: BTreeMap<String, FormWidgetConfig>,
}

/// Conjunctive match over the indexed artifact columns.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactFilter {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub revision: Option<u32>,
    pub is_active: Option<bool>,
    pub exclude_id: Option<Uuid>,
}

impl ArtifactFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn excluding(mut self, id: Uuid) -> Self {
        self.exclude_id = Some(id);
        self
    }

    pub fn matches(&self, artifact: &SchemaArtifact) -> bool {
        self.id.map_or(true, |id| artifact.id == id)
            && self.name.as_deref().map_or(true, |name| artifact.name == name)
            && self.revision.map_or(true, |r| artifact.revision == r)
            && self.is_active.map_or(true, |a| artifact.is_active == a)
            && self.exclude_id.map_or(true, |id| artifact.id != id)
    }
}

/// Flag changes applied by [`crate::store::ArtifactStore::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactPatch {
    pub is_active: Option<bool>,
    pub is_published: Option<bool>,
}

impl ArtifactPatch {
    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Self::default()
        }
    }

    pub fn published(is_published: bool) -> Self {
        Self {
            is_published: Some(is_published),
            ..Self::default()
        }
    }

    /// Apply to `artifact`; returns whether anything was set.
    pub fn apply(&self, artifact: &mut SchemaArtifact, now: DateTime<Utc>) -> bool {
        if self.is_active.is_none() && self.is_published.is_none() {
            return false;
        }
        if let Some(active) = self.is_active {
            artifact.is_active = active;
        }
        if let Some(published) = self.is_published {
            artifact.is_published = published;
        }
        artifact.updated_at = now;
        true
    }
}
