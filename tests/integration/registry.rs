#[path = "common/mod.rs"]
mod common;

use common::supervisor_in;
use svcmgr::registry::Registry;
use tempfile::tempdir;

#[test]
fn added_service_survives_reload_in_insertion_order() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("services.json");

    let supervisor = supervisor_in(temp.path(), &[("db", "postgres -D data")]);
    supervisor
        .add_service("web", "python3 -m http.server 8080")
        .unwrap();

    let reloaded = Registry::load(&path).unwrap();
    let defs = reloaded.definitions();
    assert_eq!(defs.len(), 2);
    assert_eq!(defs[0].name, "db");
    assert_eq!(defs[1].name, "web");
    assert_eq!(defs[1].command, "python3 -m http.server 8080");
}

#[test]
fn registry_file_uses_a_single_services_key() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("services.json");

    let supervisor = supervisor_in(temp.path(), &[]);
    supervisor.add_service("web", "serve --port 80").unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let services = value
        .as_object()
        .and_then(|obj| obj.get("services"))
        .and_then(|v| v.as_array())
        .expect("document must be {\"services\": [...]}");
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["name"], "web");

    // Pretty-printed with stable indentation.
    assert!(raw.contains("\n  "));
}

#[test]
fn update_and_remove_are_visible_after_reload() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("services.json");

    let supervisor = supervisor_in(
        temp.path(),
        &[("api", "serve --port 8000"), ("worker", "run-jobs")],
    );
    supervisor.update_command("api", "serve --port 9000").unwrap();
    supervisor.remove_service("worker").unwrap();

    let reloaded = Registry::load(&path).unwrap();
    assert_eq!(reloaded.get("api").unwrap().command, "serve --port 9000");
    assert!(reloaded.get("worker").is_none());
    assert_eq!(reloaded.definitions().len(), 1);
}
