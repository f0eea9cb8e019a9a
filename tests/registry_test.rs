//! Registry lifecycle through the access API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use form_schema::{
    ArtifactFilter, ArtifactPatch, ArtifactStore, CreateSchemaInput, FormWidgetConfig,
    FunctionRegistry, LookupKey, MemoryStore, RegistryError, SchemaArtifact, SchemaDefinition,
    SchemaService, StoreError, WidgetType,
};
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

fn signup_definition() -> SchemaDefinition {
    serde_json::from_value(json!({
        "type": {
            "type": "object",
            "shape": {
                "email": { "type": { "type": "string", "validation": { "email": {} } } },
                "password": { "type": { "type": "string", "validation": { "min": { "value": 8 } } } }
            }
        }
    }))
    .unwrap()
}

fn signup(description: &str) -> CreateSchemaInput {
    CreateSchemaInput::new("signup", description, signup_definition())
        .form_field("email", FormWidgetConfig::new(WidgetType::Email).label("Email"))
        .form_field("password", FormWidgetConfig::new(WidgetType::Password))
}

fn service<S: ArtifactStore>(store: S) -> SchemaService<S> {
    SchemaService::new(store, Arc::new(FunctionRegistry::with_builtins()))
}

fn active_revisions<S: ArtifactStore>(service: &SchemaService<S>, name: &str) -> Vec<u32> {
    service
        .all_versions(name)
        .unwrap()
        .iter()
        .filter(|a| a.is_active)
        .map(|a| a.revision)
        .collect()
}

mod lifecycle {
    use super::*;

    #[test]
    fn second_revision_supersedes_first() {
        let service = service(MemoryStore::new());
        let a = service.create(signup("first")).unwrap();
        assert_eq!((a.revision, a.is_active), (1, true));

        let b = service.create(signup("second")).unwrap();
        assert_eq!((b.revision, b.is_active), (2, true));
        assert!(!service.get(a.id).unwrap().is_active);

        assert_eq!(service.get_by_name("signup", None).unwrap().id, b.id);
        assert_eq!(service.get_by_name("signup", Some(1)).unwrap().id, a.id);

        let listed: Vec<Uuid> = service
            .list()
            .unwrap()
            .iter()
            .filter(|x| x.name == "signup")
            .map(|x| x.id)
            .collect();
        assert_eq!(listed, vec![b.id]);
    }

    #[test]
    fn activate_keeps_one_active_revision() {
        let service = service(MemoryStore::new());
        let a = service.create(signup("first")).unwrap();
        let b = service.create(signup("second")).unwrap();
        assert_eq!(active_revisions(&service, "signup"), vec![2]);

        let activated = service.activate(a.id).unwrap();
        assert!(activated.is_active);
        assert!(!service.get(b.id).unwrap().is_active);
        assert_eq!(active_revisions(&service, "signup"), vec![1]);

        // Activating the active revision changes nothing else.
        service.activate(a.id).unwrap();
        assert_eq!(active_revisions(&service, "signup"), vec![1]);
    }

    #[test]
    fn remove_keeps_other_history() {
        let service = service(MemoryStore::new());
        let a = service.create(signup("first")).unwrap();
        let b = service.create(signup("second")).unwrap();
        let c = service.create(signup("third")).unwrap();

        let removed = service.remove(b.id).unwrap();
        assert_eq!(removed.revision, 2);

        let history: Vec<Uuid> = service
            .all_versions("signup")
            .unwrap()
            .iter()
            .map(|x| x.id)
            .collect();
        assert_eq!(history, vec![c.id, a.id]);
        assert!(matches!(
            service.get(b.id),
            Err(RegistryError::NotFound(LookupKey::Id(id))) if id == b.id
        ));
        assert_eq!(service.get_by_name("signup", None).unwrap().id, c.id);
    }

    #[test]
    fn removing_active_revision_activates_nothing() {
        let service = service(MemoryStore::new());
        service.create(signup("first")).unwrap();
        let b = service.create(signup("second")).unwrap();

        service.remove(b.id).unwrap();
        assert!(matches!(
            service.get_by_name("signup", None),
            Err(RegistryError::NotFound(LookupKey::Active { .. }))
        ));
        assert!(service.list().unwrap().is_empty());
    }

    #[test]
    fn publishing_an_old_revision_is_allowed() {
        let service = service(MemoryStore::new());
        let a = service.create(signup("first")).unwrap();
        service.create(signup("second")).unwrap();

        let published = service.publish(a.id).unwrap();
        assert!(published.is_published);
        assert!(!published.is_active);
        assert!(!service.unpublish(a.id).unwrap().is_published);
    }

    #[test]
    fn compiled_validator_checks_submissions() {
        let service = service(MemoryStore::new());
        let artifact = service.create(signup("Sign-up")).unwrap();
        let compiled = service.compiled_validator(artifact.id).unwrap();

        assert!(compiled.is_valid(&json!({ "email": "ada@example.com", "password": "correct horse" })));
        let err = compiled
            .validate(&json!({ "email": "ada@example.com", "password": "short" }))
            .unwrap_err();
        assert_eq!(err.issues()[0].path, "/password");

        let view = service.form_config(artifact.id).unwrap();
        assert_eq!(view.form_config["email"].label.as_deref(), Some("Email"));
    }
}

mod concurrency {
    use super::*;

    #[test]
    fn concurrent_creates_assign_distinct_revisions() {
        let service = Arc::new(service(MemoryStore::new()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    let name = if i % 2 == 0 { "signup" } else { "contact" };
                    service
                        .create(CreateSchemaInput::new(name, "concurrent", signup_definition()))
                        .unwrap()
                        .revision
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for name in ["signup", "contact"] {
            let mut revisions: Vec<u32> = service
                .all_versions(name)
                .unwrap()
                .iter()
                .map(|a| a.revision)
                .collect();
            revisions.sort_unstable();
            assert_eq!(revisions, vec![1, 2, 3, 4]);
            assert_eq!(active_revisions(&service, name), vec![4]);
        }
        assert!(service.registry().audit().unwrap().is_empty());
    }

    #[test]
    fn concurrent_activations_leave_one_active() {
        let service = Arc::new(service(MemoryStore::new()));
        let ids: Vec<Uuid> = (0..4)
            .map(|_| service.create(signup("rev")).unwrap().id)
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let service = Arc::clone(&service);
                thread::spawn(move || service.activate(id).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(active_revisions(&service, "signup").len(), 1);
    }
}

/// Store that fails selected writes, for exercising rollback.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_insert: AtomicBool,
    fail_activate: Mutex<Option<Uuid>>,
}

impl ArtifactStore for FlakyStore {
    fn insert(&self, artifact: SchemaArtifact) -> Result<(), StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert rejected".into()));
        }
        self.inner.insert(artifact)
    }

    fn find(&self, filter: &ArtifactFilter) -> Result<Vec<SchemaArtifact>, StoreError> {
        self.inner.find(filter)
    }

    fn update(&self, filter: &ArtifactFilter, patch: &ArtifactPatch) -> Result<usize, StoreError> {
        let target = *self.fail_activate.lock();
        if patch.is_active == Some(true) && target.is_some() && filter.id == target {
            return Err(StoreError::Unavailable("update rejected".into()));
        }
        self.inner.update(filter, patch)
    }

    fn delete(&self, filter: &ArtifactFilter) -> Result<usize, StoreError> {
        self.inner.delete(filter)
    }
}

mod rollback {
    use super::*;

    #[test]
    fn failed_insert_restores_previous_active() {
        let service = service(FlakyStore::default());
        let a = service.create(signup("first")).unwrap();

        service.registry().store().fail_insert.store(true, Ordering::SeqCst);
        let err = service.create(signup("second")).unwrap_err();
        assert!(matches!(err, RegistryError::Store(StoreError::Unavailable(_))));
        assert_eq!(err.exit_code(), 3);

        let history = service.all_versions("signup").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, a.id);
        assert!(history[0].is_active);
    }

    #[test]
    fn failed_activation_restores_siblings() {
        let service = service(FlakyStore::default());
        let a = service.create(signup("first")).unwrap();
        let b = service.create(signup("second")).unwrap();

        *service.registry().store().fail_activate.lock() = Some(a.id);
        assert!(service.activate(a.id).is_err());

        assert!(service.get(b.id).unwrap().is_active);
        assert!(!service.get(a.id).unwrap().is_active);
        assert_eq!(active_revisions(&service, "signup"), vec![2]);
    }

    #[test]
    fn rejected_input_writes_nothing() {
        let service = service(MemoryStore::new());
        let err = service
            .create(CreateSchemaInput::new("signup", " ", signup_definition()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { field: "description", .. }));

        let malformed: SchemaDefinition =
            serde_json::from_value(json!({ "type": { "type": "union", "options": [] } })).unwrap();
        let err = service
            .create(CreateSchemaInput::new("signup", "bad", malformed))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Malformed(_)));
        assert!(service.all_versions("signup").unwrap().is_empty());
    }
}

mod shared_file {
    use super::*;
    use form_schema::FileStore;
    use tempfile::TempDir;

    #[test]
    fn services_on_one_file_continue_each_others_revisions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schemas.json");
        let first = service(FileStore::open(&path).unwrap());
        let second = service(FileStore::open(&path).unwrap());

        let a = first.create(signup("first")).unwrap();
        let b = second.create(signup("second")).unwrap();
        assert_eq!((a.revision, b.revision), (1, 2));

        let reopened = service(FileStore::open(&path).unwrap());
        assert_eq!(reopened.all_versions("signup").unwrap().len(), 2);
        assert_eq!(active_revisions(&reopened, "signup"), vec![2]);
        assert_eq!(active_revisions(&first, "signup"), vec![2]);
    }

    #[test]
    fn concurrent_services_on_one_file_keep_every_revision() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schemas.json");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                thread::spawn(move || {
                    let service = service(FileStore::open(&path).unwrap());
                    for _ in 0..3 {
                        service.create(signup("concurrent")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let service = service(FileStore::open(&path).unwrap());
        let mut revisions: Vec<u32> = service
            .all_versions("signup")
            .unwrap()
            .iter()
            .map(|a| a.revision)
            .collect();
        revisions.sort_unstable();
        assert_eq!(revisions, (1..=12).collect::<Vec<u32>>());
        assert_eq!(active_revisions(&service, "signup"), vec![12]);
        assert!(service.registry().audit().unwrap().is_empty());
    }
}
