//! CLI integration tests for the form-schema binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("form-schema"));
    cmd.env_remove("FORM_SCHEMA_STORE").env_remove("RUST_LOG");
    cmd
}

// Helper to create a temp file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const SIGNUP: &str = r#"{
    "type": {
        "type": "object",
        "shape": {
            "email": { "type": { "type": "string", "validation": { "email": {} } } },
            "age": { "type": { "type": "number", "validation": { "min": { "value": 18 } } }, "optional": true }
        }
    },
    "description": "Sign-up form"
}"#;

fn signup_input(description: &str) -> String {
    format!(
        r#"{{
            "name": "signup",
            "description": "{}",
            "definition": {},
            "formConfig": {{ "email": {{ "widgetType": "email", "label": "Email" }} }},
            "transformers": {{ "email": "toLowerCase" }},
            "preprocess": {{ "email": "trim" }}
        }}"#,
        description, SIGNUP
    )
}

/// Run `create` against `store` and return the new artifact.
fn create(store: &PathBuf, input: &PathBuf) -> Value {
    let output = cmd()
        .args(["--store", store.to_str().unwrap(), "create", input.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success(), "create failed: {:?}", output);
    serde_json::from_slice(&output.stdout).unwrap()
}

mod check_command {
    use super::*;

    #[test]
    fn valid_definition() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "signup.json", SIGNUP);

        cmd()
            .args(["check", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid schema: Sign-up form"));
    }

    #[test]
    fn malformed_definition_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "bad.json",
            r#"{"type": {"type": "object", "shape": {"role": {"type": {"type": "enum", "values": []}}}}}"#,
        );

        cmd()
            .args(["check", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("/type/shape/role/type"));
    }

    #[test]
    fn unregistered_refinement_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "bad.json",
            r#"{"type": "number", "refinements": [{"function": "isEven"}]}"#,
        );

        cmd()
            .args(["check", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unknown predicate \"isEven\""));
    }

    #[test]
    fn missing_file_exits_3() {
        cmd()
            .args(["check", "/nonexistent/schema.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn invalid_json_exits_2() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "bad.json", "{ not json");

        cmd()
            .args(["check", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_payload() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "signup.json", SIGNUP);
        let payload = write_temp_file(&dir, "payload.json", r#"{"email": "ada@example.com"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid"));
    }

    #[test]
    fn invalid_payload_lists_issues() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "signup.json", SIGNUP);
        let payload = write_temp_file(&dir, "payload.json", r#"{"email": "nope", "age": 12}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("/email: Invalid email"))
            .stderr(predicate::str::contains(
                "/age: Number must be greater than or equal to 18",
            ));
    }

    #[test]
    fn json_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "signup.json", SIGNUP);
        let payload = write_temp_file(&dir, "payload.json", r#"{"age": 30}"#);

        let output = cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--json",
            ])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));

        let result: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["valid"], false);
        assert_eq!(result["errors"][0]["path"], "/email");
        assert_eq!(result["errors"][0]["code"], "required");
        assert_eq!(result["errors"][0]["message"], "Required");
    }

    #[test]
    fn strict_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "signup.json", SIGNUP);
        let payload = write_temp_file(
            &dir,
            "payload.json",
            r#"{"email": "ada@example.com", "admin": true}"#,
        );

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""valid":true"#))
            .stdout(predicate::str::contains("admin").not());

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--strict",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Unrecognized key(s) in object: 'admin'"));
    }

    #[test]
    fn stored_schema_applies_preprocess_and_transformers() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store.json");
        let input = write_temp_file(&dir, "input.json", &signup_input("Sign-up"));
        let artifact = create(&store, &input);
        let payload = write_temp_file(&dir, "payload.json", r#"{"email": "  Ada@Example.COM "}"#);

        let output = cmd()
            .args([
                "--store",
                store.to_str().unwrap(),
                "validate",
                payload.to_str().unwrap(),
                "--id",
                artifact["id"].as_str().unwrap(),
                "--json",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());

        let result: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["output"]["email"], "ada@example.com");
    }

    #[test]
    fn unknown_id_exits_4() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store.json");
        let payload = write_temp_file(&dir, "payload.json", "{}");

        cmd()
            .args([
                "--store",
                store.to_str().unwrap(),
                "validate",
                payload.to_str().unwrap(),
                "--id",
                "00000000-0000-4000-8000-000000000000",
            ])
            .assert()
            .code(4)
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn schema_or_id_required() {
        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(&dir, "payload.json", "{}");

        cmd()
            .args(["validate", payload.to_str().unwrap()])
            .assert()
            .failure();
    }

    #[test]
    fn missing_payload_exits_3() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "signup.json", SIGNUP);

        cmd()
            .args([
                "validate",
                "/nonexistent/payload.json",
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("loading payload"));
    }
}

mod lint_command {
    use super::*;

    #[test]
    fn clean_directory() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "signup.json", SIGNUP);

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 files checked, all passed"));
    }

    #[test]
    fn errors_fail() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "signup.json", SIGNUP);
        write_temp_file(&dir, "broken.json", "{ not json");

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("E001"))
            .stdout(predicate::str::contains("1 passed, 1 failed"));
    }

    #[test]
    fn json_format() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(
            &dir,
            "input.json",
            r#"{"name": "signup", "description": "Sign-up",
                "definition": {"type": {"type": "object", "shape": {"email": {"type": "string"}}}},
                "formConfig": {"phone": {"widgetType": "tel"}}}"#,
        );

        let output = cmd()
            .args(["lint", file.to_str().unwrap(), "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let result: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["files_checked"], 1);
        assert_eq!(result["warnings"], 2);
        let codes: Vec<&str> = result["results"][0]["diagnostics"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["W001", "W003"]);
    }

    #[test]
    fn strict_fails_on_warnings() {
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(
            &dir,
            "input.json",
            r#"{"name": "signup", "description": "Sign-up",
                "definition": {"type": {"type": "object", "shape": {"email": {"type": "string"}}}}}"#,
        );

        cmd()
            .args(["lint", file.to_str().unwrap()])
            .assert()
            .success();
        cmd()
            .args(["lint", file.to_str().unwrap(), "--strict"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("W003"));
    }

    #[test]
    fn missing_path_exits_2() {
        cmd()
            .args(["lint", "/nonexistent/dir"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("path not found"));
    }
}

mod registry_commands {
    use super::*;

    #[test]
    fn create_show_and_versions() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store.json");
        let v1 = write_temp_file(&dir, "v1.json", &signup_input("first"));
        let v2 = write_temp_file(&dir, "v2.json", &signup_input("second"));

        let first = create(&store, &v1);
        assert_eq!(first["revision"], 1);
        assert_eq!(first["isActive"], true);
        let second = create(&store, &v2);
        assert_eq!(second["revision"], 2);

        cmd()
            .args(["--store", store.to_str().unwrap(), "show", "signup"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""description": "second""#));

        cmd()
            .args([
                "--store",
                store.to_str().unwrap(),
                "show",
                "signup",
                "--revision",
                "1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""isActive": false"#));

        let output = cmd()
            .args(["--store", store.to_str().unwrap(), "versions", "signup"])
            .output()
            .unwrap();
        let versions: Value = serde_json::from_slice(&output.stdout).unwrap();
        let revisions: Vec<u64> = versions
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["revision"].as_u64().unwrap())
            .collect();
        assert_eq!(revisions, vec![2, 1]);
    }

    #[test]
    fn store_from_environment() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("env-store.json");
        let input = write_temp_file(&dir, "input.json", &signup_input("Sign-up"));

        cmd()
            .env("FORM_SCHEMA_STORE", &store)
            .args(["create", input.to_str().unwrap()])
            .assert()
            .success();
        assert!(store.exists());

        cmd()
            .env("FORM_SCHEMA_STORE", &store)
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""name": "signup""#));
    }

    #[test]
    fn activate_switches_active_revision() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store.json");
        let input = write_temp_file(&dir, "input.json", &signup_input("Sign-up"));
        let first = create(&store, &input);
        create(&store, &input);

        cmd()
            .args([
                "--store",
                store.to_str().unwrap(),
                "activate",
                first["id"].as_str().unwrap(),
            ])
            .assert()
            .success();

        cmd()
            .args(["--store", store.to_str().unwrap(), "show", "signup"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""revision": 1"#));

        cmd()
            .args(["--store", store.to_str().unwrap(), "audit"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn publish_and_form_config() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store.json");
        let input = write_temp_file(&dir, "input.json", &signup_input("Sign-up"));
        let artifact = create(&store, &input);
        let id = artifact["id"].as_str().unwrap();

        cmd()
            .args(["--store", store.to_str().unwrap(), "publish", id])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""isPublished": true"#));

        let output = cmd()
            .args(["--store", store.to_str().unwrap(), "form-config", id])
            .output()
            .unwrap();
        assert!(output.status.success());
        let view: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(view["formConfig"]["email"]["widgetType"], "email");
        assert_eq!(view["definition"]["type"]["type"], "object");
    }

    #[test]
    fn remove_then_show_exits_4() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store.json");
        let input = write_temp_file(&dir, "input.json", &signup_input("Sign-up"));
        let artifact = create(&store, &input);
        let id = artifact["id"].as_str().unwrap();

        cmd()
            .args(["--store", store.to_str().unwrap(), "remove", id])
            .assert()
            .success();

        cmd()
            .args(["--store", store.to_str().unwrap(), "get", id])
            .assert()
            .code(4)
            .stderr(predicate::str::contains("not found"));

        cmd()
            .args(["--store", store.to_str().unwrap(), "show", "signup"])
            .assert()
            .code(4);
    }

    #[test]
    fn blank_name_exits_2() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store.json");
        let input = write_temp_file(
            &dir,
            "input.json",
            r#"{"name": "  ", "description": "x", "definition": {"type": "string"}}"#,
        );

        cmd()
            .args(["--store", store.to_str().unwrap(), "create", input.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid input: name"));
        assert!(!store.exists());
    }

    #[test]
    fn corrupt_store_exits_2() {
        let dir = TempDir::new().unwrap();
        let store = write_temp_file(&dir, "store.json", "{ nope");

        cmd()
            .args(["--store", store.to_str().unwrap(), "list"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("is corrupt"));
    }
}

mod help_command {
    use super::*;

    #[test]
    fn lists_commands() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("validate"))
            .stdout(predicate::str::contains("form-config"));
    }
}
