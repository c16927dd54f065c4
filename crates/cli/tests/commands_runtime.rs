use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use quorum_cli::commands::executions::{self, Decision};
use quorum_cli::commands::{chains, config, migrate, preview, seed, select, stats, sweep};
use quorum_core::config::LoadOptions;
use serde_json::Value;

const DEMO_CHAINS: [&str; 4] =
    ["chain-po-standard", "chain-po-engineering", "chain-contract-legal", "chain-expense-fast"];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("QUORUM_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("QUORUM_DATABASE_URL", "postgres://localhost/quorum")], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_and_lists_every_demo_chain() {
    let db = TempDatabase::new();
    with_env(&db.env(), || {
        let first = seed::run(&LoadOptions::default());
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let second = seed::run(&LoadOptions::default());
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");

        let first_payload = parse_payload(&first.output);
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);

        let message = first_payload["message"].as_str().unwrap_or_default();
        for chain in DEMO_CHAINS {
            assert!(message.contains(chain), "seed summary should list {chain}");
        }
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("QUORUM_LOG_LEVEL", "debug"), ("QUORUM_ENGINE_DEFAULT_TENANT", "acme")], || {
        let result = config::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 0);

        assert!(result
            .output
            .contains("- logging.level = debug (source: env (QUORUM_LOG_LEVEL))"));
        assert!(result.output.contains(
            "- engine.default_tenant = acme (source: env (QUORUM_ENGINE_DEFAULT_TENANT))"
        ));
        assert!(result.output.contains("- engine.sweep_interval_secs = 60 (source: default)"));
    });
}

#[test]
fn request_lifecycle_runs_across_separate_commands() {
    let db = TempDatabase::new();
    let request = db.write(
        "request.json",
        r#"{
            "id": "req-po-42",
            "approval_type": "purchase_order",
            "requester_id": "requester-9",
            "payload": { "po_number": "PO-42" },
            "context": { "amount": "2500", "department": "marketing" }
        }"#,
    );

    with_env(&db.env(), || {
        let options = LoadOptions::default();
        assert_eq!(seed::run(&options).exit_code, 0);

        let started = executions::run_start(&options, &request, None);
        assert_eq!(started.exit_code, 0, "start failed: {}", started.output);
        let started = parse_payload(&started.output);
        let execution = &started["data"]["execution"];
        assert_eq!(execution["chain_id"], "chain-po-standard");
        assert_eq!(execution["tenant_id"], "demo");
        assert_eq!(execution["status"], "pending");
        assert_eq!(execution["current_step_order"], 1);
        let execution_id = execution["id"].as_str().unwrap_or_default().to_string();

        let wrong_order = executions::run_respond(
            &options,
            &execution_id,
            2,
            "manager-lee",
            Decision::Approve,
            None,
        );
        assert_eq!(wrong_order.exit_code, 7);
        assert_eq!(parse_payload(&wrong_order.output)["error_class"], "rejected");

        let responded = executions::run_respond(
            &options,
            &execution_id,
            1,
            "manager-lee",
            Decision::Approve,
            Some("within budget".to_string()),
        );
        assert_eq!(responded.exit_code, 0, "respond failed: {}", responded.output);
        assert_eq!(parse_payload(&responded.output)["data"]["execution"]["status"], "approved");

        let shown = executions::run_show(&options, &execution_id);
        assert_eq!(shown.exit_code, 0);
        let shown = parse_payload(&shown.output);
        let reasons: Vec<&str> = shown["data"]["transitions"]
            .as_array()
            .map(|transitions| {
                transitions.iter().filter_map(|transition| transition["reason"].as_str()).collect()
            })
            .unwrap_or_default();
        assert_eq!(reasons, vec!["created", "step_approved"]);

        let usage = stats::run(&options, "chain-po-standard");
        assert_eq!(usage.exit_code, 0);
        let usage = parse_payload(&usage.output);
        assert_eq!(usage["data"]["usage_count"], 1);
        assert_eq!(usage["data"]["approved_count"], 1);

        let swept = sweep::run(&options);
        assert_eq!(swept.exit_code, 0);
        assert_eq!(parse_payload(&swept.output)["message"], "applied 0 due timeout(s)");
    });
}

#[test]
fn deactivating_a_chain_changes_selection() {
    let db = TempDatabase::new();
    let context = db.write("context.json", r#"{ "department": "engineering" }"#);

    with_env(&db.env(), || {
        let options = LoadOptions::default();
        assert_eq!(seed::run(&options).exit_code, 0);

        let before = parse_payload(
            &select::run(&options, "purchase_order", None, Some(context.as_path())).output,
        );
        assert_eq!(before["data"]["selected_chain_id"], "chain-po-engineering");
        assert_eq!(before["data"]["ranking"].as_array().map(Vec::len), Some(2));

        let deactivated = chains::run_deactivate(&options, "chain-po-engineering");
        assert_eq!(deactivated.exit_code, 0);
        assert_eq!(parse_payload(&deactivated.output)["data"]["status"], "inactive");

        let after = parse_payload(
            &select::run(&options, "purchase_order", None, Some(context.as_path())).output,
        );
        assert_eq!(after["data"]["selected_chain_id"], "chain-po-standard");

        let reactivated = chains::run_activate(&options, "chain-po-engineering");
        assert_eq!(reactivated.exit_code, 0);
    });
}

#[test]
fn validate_and_preview_report_on_stored_chains() {
    let db = TempDatabase::new();
    let request = db.write(
        "request.json",
        r#"{
            "approval_type": "purchase_order",
            "requester_id": "requester-3",
            "context": { "amount": "60000", "department": "marketing" }
        }"#,
    );
    let broken = db.write("broken.json", "{ nope");

    with_env(&db.env(), || {
        let options = LoadOptions::default();
        assert_eq!(seed::run(&options).exit_code, 0);

        let valid = parse_payload(&chains::run_validate(&options, "chain-po-standard").output);
        assert_eq!(valid["status"], "ok");
        assert_eq!(valid["data"]["is_valid"], true);

        let missing = chains::run_validate(&options, "chain-missing");
        assert_eq!(missing.exit_code, 8);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");

        let previewed = preview::run(&options, "chain-po-standard", &request);
        assert_eq!(previewed.exit_code, 0, "preview failed: {}", previewed.output);
        let previewed = parse_payload(&previewed.output);
        assert_eq!(previewed["data"]["status"], "pending");
        assert_eq!(previewed["data"]["participating_steps"], 3);

        let unreadable = preview::run(&options, "chain-po-standard", &broken);
        assert_eq!(unreadable.exit_code, 7);
        assert_eq!(parse_payload(&unreadable.output)["error_class"], "invalid_input");

        let listed = parse_payload(&chains::run_list(&options, None).output);
        assert_eq!(listed["data"].as_array().map(Vec::len), Some(4));
    });
}

#[test]
fn import_rejects_a_duplicate_code_under_another_id() {
    let db = TempDatabase::new();
    let duplicate = db.write(
        "duplicate.json",
        r#"{
            "id": "chain-po-copy",
            "tenant_id": "demo",
            "code": "PO-STD",
            "name": "Copy of the standard chain",
            "approval_type": "purchase_order",
            "mode": "sequential",
            "default_timeout_hours": "24",
            "steps": [
                {
                    "id": "copy-1",
                    "order": 1,
                    "name": "Manager",
                    "approver": { "role_id": "manager" }
                }
            ],
            "status": "draft",
            "created_at": "2026-02-01T00:00:00Z",
            "updated_at": "2026-02-01T00:00:00Z"
        }"#,
    );

    with_env(&db.env(), || {
        let options = LoadOptions::default();
        assert_eq!(seed::run(&options).exit_code, 0);

        let result = chains::run_import(&options, &duplicate);
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "conflict");
    });
}

struct TempDatabase {
    dir: tempfile::TempDir,
    url: String,
}

impl TempDatabase {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("quorum.db").display());
        Self { dir, url }
    }

    fn env(&self) -> Vec<(&str, &str)> {
        vec![("QUORUM_DATABASE_URL", self.url.as_str()), ("QUORUM_ENGINE_DEFAULT_TENANT", "demo")]
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write fixture file");
        path
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "QUORUM_DATABASE_URL",
        "QUORUM_DATABASE_MAX_CONNECTIONS",
        "QUORUM_DATABASE_TIMEOUT_SECS",
        "QUORUM_ENGINE_DEFAULT_TENANT",
        "QUORUM_ENGINE_DEFAULT_ESCALATION_TIMEOUT_HOURS",
        "QUORUM_ENGINE_SWEEP_INTERVAL_SECS",
        "QUORUM_LOGGING_LEVEL",
        "QUORUM_LOGGING_FORMAT",
        "QUORUM_LOG_LEVEL",
        "QUORUM_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
