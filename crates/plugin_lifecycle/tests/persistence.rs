mod common;

use common::{journal, module, recorder, service, take, Faults, Journal, RecorderOptions};
use plugin_lifecycle::{
    Catalog, DeclarationMetadata, FileStateStore, Hook, LifecycleError, OptionsEnvelope,
    Orchestrator, OrchestratorConfig, PluginDeclaration, PluginTypeId, StateStore,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn config(root: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        cache_dir: root.join("cache"),
        backup_dir: root.join("backups"),
        max_backups: 2,
        debug_log_dir: Some(root.join("logs")),
        ..Default::default()
    }
}

fn declarations(journal: &Journal) -> Vec<PluginDeclaration> {
    vec![service(journal, "Shop", 0), module(journal, "Arena", 5, false)]
}

/// A file-backed host, as a real process would build one.
fn file_host(root: &Path, declarations: Vec<PluginDeclaration>) -> Orchestrator {
    let catalog = declarations
        .into_iter()
        .fold(Catalog::new("tests", "0.1.0"), Catalog::with);
    Orchestrator::builder(config(root)).catalog(catalog).build()
}

#[test]
fn state_and_options_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let journal = journal();

    {
        let host = file_host(dir.path(), declarations(&journal));
        host.boot().unwrap();
        host.enable("Arena").unwrap();
        host.set_debug("Shop", true).unwrap();
        host.set_quiet("Shop", false).unwrap();
        host.set_priority("Arena", 1).unwrap();
        host.update_options("Shop", json!({ "greeting": "welcome", "volume": 3 }))
            .unwrap();
        host.world_save().unwrap();
        host.shutdown().unwrap();
    }
    take(&journal);

    let host = file_host(dir.path(), declarations(&journal));
    host.boot().unwrap();

    // Arena comes back enabled and joins the boot passes.
    assert_eq!(
        take(&journal),
        vec![
            "configure:Shop",
            "configure:Arena",
            "load:Shop",
            "load:Arena",
            "invoke:Shop",
            "invoke:Arena",
        ]
    );

    let shop = host.snapshot("Shop").unwrap();
    assert!(shop.debug);
    assert!(!shop.quiet);
    let arena = host.snapshot("Arena").unwrap();
    assert_eq!(arena.enabled, Some(true));
    assert_eq!(arena.deferred, Some(false));
    assert_eq!(arena.priority, 1);

    assert_eq!(
        host.options_json("Shop").unwrap(),
        json!({ "greeting": "welcome", "volume": 3 })
    );
}

#[test]
fn stale_options_type_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let journal = journal();

    let store = FileStateStore::new(dir.path().join("cache"));
    store
        .save_options(
            &PluginTypeId::new("tests::Shop"),
            &OptionsEnvelope {
                type_tag: "tests::OldShopOptions".to_string(),
                data: json!({ "greeting": "stale", "volume": 11 }),
            },
        )
        .unwrap();

    let host = file_host(dir.path(), declarations(&journal));
    host.boot().unwrap();

    assert_eq!(
        host.options_json("Shop").unwrap(),
        serde_json::to_value(RecorderOptions::default()).unwrap()
    );
    assert!(host.recent_faults().is_empty());
}

#[test]
fn invalid_options_update_is_rejected_whole() {
    let dir = TempDir::new().unwrap();
    let journal = journal();
    let host = file_host(dir.path(), declarations(&journal));
    host.boot().unwrap();

    host.update_options("Shop", json!({ "greeting": "hi", "volume": 2 }))
        .unwrap();
    let err = host
        .update_options("Shop", json!({ "greeting": "loud", "volume": "max" }))
        .unwrap_err();

    assert!(matches!(err, LifecycleError::InvalidOptions { ref plugin, .. } if plugin == "Shop"));
    assert_eq!(
        host.options_json("Shop").unwrap(),
        json!({ "greeting": "hi", "volume": 2 })
    );
}

#[test]
fn world_save_backs_up_then_saves() {
    let dir = TempDir::new().unwrap();
    let journal = journal();
    let host = file_host(dir.path(), declarations(&journal));
    host.boot().unwrap();
    take(&journal);

    // A fresh boot has nothing on disk, so the first backup is skipped.
    host.world_save().unwrap();
    assert_eq!(take(&journal), vec!["save:Shop"]);
    assert!(dir.path().join("cache").join("options").exists());

    for _ in 0..3 {
        host.world_save().unwrap();
    }
    let backups: Vec<_> = fs::read_dir(dir.path().join("backups")).unwrap().collect();
    assert_eq!(backups.len(), 2);
}

#[test]
fn debug_plugins_write_their_own_log() {
    let dir = TempDir::new().unwrap();
    let journal = journal();
    let host = file_host(
        dir.path(),
        vec![recorder(
            &journal,
            DeclarationMetadata::service().name("Noisy").debug(true),
            Faults::failing(&[Hook::Invoke]),
        )],
    );
    host.boot().unwrap();

    let log = fs::read_to_string(dir.path().join("logs").join("Noisy.log")).unwrap();
    assert!(log.contains("configure ok"));
    assert!(log.contains("invoke failed"));
    assert!(log.contains("Noisy refused invoke"));
}

#[test]
fn missing_state_keeps_declared_defaults() {
    let dir = TempDir::new().unwrap();
    let journal = journal();
    let host = file_host(dir.path(), declarations(&journal));
    host.compile().unwrap();

    let arena = host.snapshot("Arena").unwrap();
    assert_eq!(arena.priority, 5);
    assert_eq!(arena.enabled, Some(false));
    assert!(arena.quiet);
    assert!(!arena.debug);
}
