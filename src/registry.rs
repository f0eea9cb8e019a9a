//! Versioned schema registry.
//!
//! Every name owns an append-only list of revisions, and at most one of them
//! is active. Operations that change activation for a name run inside that
//! name's critical section, so concurrent `create`/`activate` calls for one
//! name are serialized while different names proceed in parallel. When a
//! later step of such an operation fails, the flags changed by earlier steps
//! are restored before the error is returned.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::artifact::{ArtifactFilter, ArtifactPatch, CreateSchemaInput, SchemaArtifact};
use crate::error::{ConsistencyViolation, LookupKey, RegistryError, StoreError};
use crate::store::ArtifactStore;

pub struct Registry<S> {
    store: S,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: ArtifactStore> Registry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` inside the critical section for `name`, with the store held
    /// exclusively. The name's lock entry is dropped once nobody waits on it.
    fn exclusive<T>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let lock = self.locks.entry(name.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            match self.store.lock() {
                Ok(_held) => f(),
                Err(e) => Err(e.into()),
            }
        };
        drop(lock);
        self.locks.remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Store a new revision of `input.name` and make it the active one.
    ///
    /// The first revision of a name is 1; later ones are the highest existing
    /// revision plus one. Every previously active revision is deactivated.
    #[tracing::instrument(skip(self, input), fields(name = %input.name))]
    pub fn create(&self, input: CreateSchemaInput) -> Result<SchemaArtifact, RegistryError> {
        check_input(&input)?;
        input.definition.check()?;

        let name = input.name.clone();
        self.exclusive(&name, || {
            let existing = self.store.find(&ArtifactFilter::name(&name))?;
            let revision = existing
                .iter()
                .map(|a| a.revision)
                .max()
                .map_or(1, |max| max + 1);
            let previously_active: Vec<Uuid> = existing
                .iter()
                .filter(|a| a.is_active)
                .map(|a| a.id)
                .collect();

            self.deactivate_all(&previously_active)?;
            let artifact = input.into_artifact(revision);
            if let Err(e) = self.store.insert(artifact.clone()) {
                self.reactivate(&previously_active);
                return Err(e.into());
            }

            tracing::info!(id = %artifact.id, revision, "created schema revision");
            Ok(artifact)
        })
    }

    pub fn get(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.store
            .find(&ArtifactFilter::id(id))?
            .into_iter()
            .next()
            .ok_or(RegistryError::NotFound(LookupKey::Id(id)))
    }

    /// The active revision of `name`.
    ///
    /// Should more than one revision be active, the highest one is returned
    /// and the inconsistency is logged.
    pub fn find_active(&self, name: &str) -> Result<SchemaArtifact, RegistryError> {
        let active = self.store.find(&ArtifactFilter::name(name).active(true))?;
        if active.len() > 1 {
            tracing::warn!(name, count = active.len(), "multiple active revisions");
        }
        active
            .into_iter()
            .max_by_key(|a| a.revision)
            .ok_or_else(|| RegistryError::NotFound(LookupKey::Active { name: name.into() }))
    }

    pub fn find_by_revision(&self, name: &str, revision: u32) -> Result<SchemaArtifact, RegistryError> {
        self.store
            .find(&ArtifactFilter::name(name).revision(revision))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RegistryError::NotFound(LookupKey::Revision {
                    name: name.into(),
                    revision,
                })
            })
    }

    /// One active artifact per name, ordered by name.
    pub fn list_active(&self) -> Result<Vec<SchemaArtifact>, RegistryError> {
        let mut by_name: BTreeMap<String, SchemaArtifact> = BTreeMap::new();
        for artifact in self.store.find(&ArtifactFilter::all().active(true))? {
            match by_name.get(&artifact.name) {
                Some(current) => {
                    tracing::warn!(name = %artifact.name, "multiple active revisions");
                    if artifact.revision > current.revision {
                        by_name.insert(artifact.name.clone(), artifact);
                    }
                }
                None => {
                    by_name.insert(artifact.name.clone(), artifact);
                }
            }
        }
        Ok(by_name.into_values().collect())
    }

    /// Every revision of `name`, newest first. Unknown names have no history.
    pub fn history(&self, name: &str) -> Result<Vec<SchemaArtifact>, RegistryError> {
        let mut revisions = self.store.find(&ArtifactFilter::name(name))?;
        revisions.sort_by(|a, b| b.revision.cmp(&a.revision));
        Ok(revisions)
    }

    /// Make `id` the only active revision of its name.
    #[tracing::instrument(skip(self))]
    pub fn activate(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        let name = self.get(id)?.name;
        self.exclusive(&name, || {
            let siblings: Vec<Uuid> = self
                .store
                .find(&ArtifactFilter::name(&name).active(true).excluding(id))?
                .into_iter()
                .map(|a| a.id)
                .collect();
            self.deactivate_all(&siblings)?;

            match self.store.update(&ArtifactFilter::id(id), &ArtifactPatch::active(true)) {
                Ok(0) => {
                    self.reactivate(&siblings);
                    return Err(RegistryError::NotFound(LookupKey::Id(id)));
                }
                Ok(_) => {}
                Err(e) => {
                    self.reactivate(&siblings);
                    return Err(e.into());
                }
            }

            tracing::info!(%id, name = %name, deactivated = siblings.len(), "activated schema revision");
            self.get(id)
        })
    }

    /// Clear the active flag. No other revision is activated in its place.
    #[tracing::instrument(skip(self))]
    pub fn deactivate(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        let name = self.get(id)?.name;
        self.exclusive(&name, || {
            self.patch(id, ArtifactPatch::active(false))?;
            tracing::info!(%id, name = %name, "deactivated schema revision");
            self.get(id)
        })
    }

    /// Mark as published. Any revision may be published, active or not.
    pub fn publish(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.patch(id, ArtifactPatch::published(true))?;
        self.get(id)
    }

    pub fn unpublish(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        self.patch(id, ArtifactPatch::published(false))?;
        self.get(id)
    }

    /// Delete one revision. Other revisions of the name are left untouched,
    /// and removing the active one leaves the name without an active revision.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, id: Uuid) -> Result<SchemaArtifact, RegistryError> {
        let artifact = self.get(id)?;
        let name = artifact.name.clone();
        self.exclusive(&name, || {
            if self.store.delete(&ArtifactFilter::id(id))? == 0 {
                return Err(RegistryError::NotFound(LookupKey::Id(id)));
            }
            tracing::info!(%id, name = %artifact.name, revision = artifact.revision, "removed schema revision");
            Ok(artifact)
        })
    }

    /// Names with more than one active revision. Read-only.
    pub fn audit(&self) -> Result<Vec<ConsistencyViolation>, RegistryError> {
        let mut active: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for artifact in self.store.find(&ArtifactFilter::all().active(true))? {
            active.entry(artifact.name).or_default().push(artifact.revision);
        }
        let violations: Vec<ConsistencyViolation> = active
            .into_iter()
            .filter(|(_, revisions)| revisions.len() > 1)
            .map(|(name, mut revisions)| {
                revisions.sort_unstable_by(|a, b| b.cmp(a));
                ConsistencyViolation {
                    name,
                    active_revisions: revisions,
                }
            })
            .collect();
        for violation in &violations {
            tracing::warn!(%violation, "consistency violation");
        }
        Ok(violations)
    }

    fn patch(&self, id: Uuid, patch: ArtifactPatch) -> Result<(), RegistryError> {
        match self.store.update(&ArtifactFilter::id(id), &patch)? {
            0 => Err(RegistryError::NotFound(LookupKey::Id(id))),
            _ => Ok(()),
        }
    }

    /// Deactivate each id; on failure restore the ones already changed.
    fn deactivate_all(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        for (done, id) in ids.iter().enumerate() {
            if let Err(e) = self
                .store
                .update(&ArtifactFilter::id(*id), &ArtifactPatch::active(false))
            {
                self.reactivate(&ids[..done]);
                return Err(e);
            }
        }
        Ok(())
    }

    fn reactivate(&self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        tracing::warn!(count = ids.len(), "restoring previously active revisions");
        for id in ids {
            if let Err(e) = self
                .store
                .update(&ArtifactFilter::id(*id), &ArtifactPatch::active(true))
            {
                tracing::error!(%id, error = %e, "failed to restore active flag");
            }
        }
    }
}

fn check_input(input: &CreateSchemaInput) -> Result<(), RegistryError> {
    if input.name.trim().is_empty() {
        return Err(RegistryError::InvalidInput {
            field: "name",
            message: "must not be blank".into(),
        });
    }
    if input.description.trim().is_empty() {
        return Err(RegistryError::InvalidInput {
            field: "description",
            message: "must not be blank".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SchemaDefinition, SchemaNode};
    use crate::error::MalformedSchema;
    use crate::store::MemoryStore;

    fn input(name: &str) -> CreateSchemaInput {
        CreateSchemaInput::new(name, "test schema", SchemaDefinition::new(SchemaNode::string()))
    }

    #[test]
    fn first_revision_is_one_and_active() {
        let registry = Registry::new(MemoryStore::new());
        let a = registry.create(input("signup")).unwrap();
        assert_eq!(a.revision, 1);
        assert!(a.is_active);
    }

    #[test]
    fn blank_name_or_description_rejected() {
        let registry = Registry::new(MemoryStore::new());
        assert!(matches!(
            registry.create(input("  ")),
            Err(RegistryError::InvalidInput { field: "name", .. })
        ));
        let mut blank = input("signup");
        blank.description = String::new();
        assert!(matches!(
            registry.create(blank),
            Err(RegistryError::InvalidInput { field: "description", .. })
        ));
    }

    #[test]
    fn malformed_definition_not_stored() {
        let registry = Registry::new(MemoryStore::new());
        let bad = CreateSchemaInput::new(
            "signup",
            "bad",
            SchemaDefinition::new(SchemaNode::Enum { values: vec![] }),
        );
        assert!(matches!(
            registry.create(bad),
            Err(RegistryError::Malformed(MalformedSchema::EmptyEnum { .. }))
        ));
        assert!(registry.history("signup").unwrap().is_empty());
    }

    #[test]
    fn revisions_continue_after_removal_of_latest() {
        let registry = Registry::new(MemoryStore::new());
        registry.create(input("signup")).unwrap();
        let b = registry.create(input("signup")).unwrap();
        registry.remove(b.id).unwrap();
        let c = registry.create(input("signup")).unwrap();
        assert_eq!(c.revision, 2);
    }

    #[test]
    fn name_locks_are_released_after_use() {
        let registry = Registry::new(MemoryStore::new());
        for name in ["signup", "contact", "profile"] {
            let a = registry.create(input(name)).unwrap();
            registry.activate(a.id).unwrap();
            registry.deactivate(a.id).unwrap();
            registry.remove(a.id).unwrap();
        }
        assert!(registry.create(input(" ")).is_err());
        assert!(registry.locks.is_empty());
    }

    #[test]
    fn deactivate_leaves_name_without_active_revision() {
        let registry = Registry::new(MemoryStore::new());
        let a = registry.create(input("signup")).unwrap();
        let a = registry.deactivate(a.id).unwrap();
        assert!(!a.is_active);
        assert!(matches!(
            registry.find_active("signup"),
            Err(RegistryError::NotFound(LookupKey::Active { .. }))
        ));
        assert!(registry.list_active().unwrap().is_empty());
    }

    #[test]
    fn publish_is_independent_of_activation() {
        let registry = Registry::new(MemoryStore::new());
        let a = registry.create(input("signup")).unwrap();
        registry.create(input("signup")).unwrap();

        let a = registry.publish(a.id).unwrap();
        assert!(a.is_published);
        assert!(!a.is_active);
        let a = registry.unpublish(a.id).unwrap();
        assert!(!a.is_published);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = Registry::new(MemoryStore::new());
        let id = Uuid::new_v4();
        for result in [
            registry.get(id),
            registry.activate(id),
            registry.deactivate(id),
            registry.publish(id),
            registry.remove(id),
        ] {
            assert!(matches!(result, Err(RegistryError::NotFound(LookupKey::Id(missing))) if missing == id));
        }
    }

    #[test]
    fn duplicate_actives_resolve_to_highest_revision() {
        let registry = Registry::new(MemoryStore::new());
        let a = registry.create(input("signup")).unwrap();
        let b = registry.create(input("signup")).unwrap();
        // Bypass the registry to simulate a store written by another process.
        registry
            .store()
            .update(&ArtifactFilter::id(a.id), &ArtifactPatch::active(true))
            .unwrap();

        assert_eq!(registry.find_active("signup").unwrap().id, b.id);
        let listed = registry.list_active().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(
            registry.audit().unwrap(),
            vec![ConsistencyViolation {
                name: "signup".into(),
                active_revisions: vec![2, 1],
            }]
        );
    }

    #[test]
    fn list_active_sorted_by_name() {
        let registry = Registry::new(MemoryStore::new());
        registry.create(input("profile")).unwrap();
        registry.create(input("address")).unwrap();
        registry.create(input("profile")).unwrap();
        let names: Vec<(String, u32)> = registry
            .list_active()
            .unwrap()
            .into_iter()
            .map(|a| (a.name, a.revision))
            .collect();
        assert_eq!(names, vec![("address".into(), 1), ("profile".into(), 2)]);
        assert!(registry.audit().unwrap().is_empty());
    }
}
