use migraplan::{
    ExecutionError, InitialStateDetector, JsonFileStateStore, MemoryStateStore, MigrationPlan,
    MigrationUnitRef, PlanDefinition, PlanError, RunStatus, SemVersion, StatePersistence,
    StateToken, StaticVersion, UpgradeConfig, Upgrader, VersionDetectionError, unit_fn,
};
use std::sync::Arc;
use tempfile::tempdir;

/// Stand-in for the database a run migrates.
#[derive(Debug, Default)]
struct Database {
    applied: Vec<String>,
    fail_on: Option<&'static str>,
}

fn unit(id: &'static str) -> MigrationUnitRef<Database> {
    unit_fn(id, move |db: &mut Database| {
        if db.fail_on == Some(id) {
            anyhow::bail!("deadlock while running {}", id);
        }
        db.applied.push(id.to_string());
        Ok(())
    })
}

fn four_step_plan(name: &str) -> Arc<MigrationPlan<Database>> {
    Arc::new(
        MigrationPlan::builder(name)
            .from("")
            .chain(unit("U1"), "{S1}")
            .chain(unit("U2"), "{S2}")
            .chain(unit("U3"), "{S3}")
            .chain(unit("U4"), "{S4}")
            .build()
            .unwrap(),
    )
}

fn legacy_plan() -> Arc<MigrationPlan<Database>> {
    Arc::new(
        MigrationPlan::builder("Cms.Core")
            .from("{init-7.10.0}")
            .chain(unit("AddLockObjects"), "{L}")
            .chain(unit("AddContentNuTable"), "{N}")
            .from("{init-7.10.1}")
            .chain_to("{init-7.10.0}")
            .build()
            .unwrap(),
    )
}

// 7.12 skips U4 by replaying U1..U3 onto {D}
fn copied_span_plan() -> Arc<MigrationPlan<Database>> {
    Arc::new(
        MigrationPlan::builder("Cms.Core")
            .from("{init-7.10.0}")
            .chain(unit("U1"), "{A}")
            .chain(unit("U2"), "{B}")
            .chain(unit("U3"), "{C}")
            .chain(unit("U4"), "{D}")
            .from("{init-7.12.0}")
            .copy_chain("{init-7.10.0}", "{C}", "{D}")
            .build()
            .unwrap(),
    )
}

fn detector() -> InitialStateDetector {
    InitialStateDetector::new(SemVersion::new(7, 10, 0), SemVersion::new(8, 0, 0))
}

#[tokio::test]
async fn failed_run_resumes_with_the_remaining_units() {
    let store = Arc::new(MemoryStateStore::new());
    let mut upgrader = Upgrader::new(four_step_plan("core"), store.clone());
    let mut db = Database {
        fail_on: Some("U3"),
        ..Database::default()
    };

    let err = upgrader.run(&mut db).await.unwrap_err();
    match err {
        PlanError::Execution(ExecutionError::UnitFailed { unit, from, to, .. }) => {
            assert_eq!(unit, "U3");
            assert_eq!(from, StateToken::new("{S2}"));
            assert_eq!(to, StateToken::new("{S3}"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(upgrader.status(), RunStatus::Failed);
    assert_eq!(upgrader.current_state(), Some(&StateToken::new("{S2}")));
    assert_eq!(
        store.load("Migrations.State+core").await.unwrap(),
        Some(StateToken::new("{S2}"))
    );
    assert_eq!(db.applied, vec!["U1", "U2"]);

    db.fail_on = None;
    let report = upgrader.run(&mut db).await.unwrap();
    assert_eq!(report.origin, StateToken::new("{S2}"));
    assert_eq!(report.executed, vec!["U3", "U4"]);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(db.applied, vec!["U1", "U2", "U3", "U4"]);
    assert_eq!(
        store.load("Migrations.State+core").await.unwrap(),
        Some(StateToken::new("{S4}"))
    );
}

#[tokio::test]
async fn failure_inside_a_copied_span_resumes_after_rebuild() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("migrations.json");
    let key = "Migrations.State+Cms.Core";

    let persisted = {
        let store = Arc::new(JsonFileStateStore::new(&path));
        store.save(key, &StateToken::new("{init-7.12.0}")).await.unwrap();
        let mut upgrader = Upgrader::new(copied_span_plan(), store.clone());
        let mut db = Database {
            fail_on: Some("U2"),
            ..Database::default()
        };
        assert!(upgrader.run(&mut db).await.is_err());
        assert_eq!(db.applied, vec!["U1"]);
        store.load(key).await.unwrap().unwrap()
    };
    assert_ne!(persisted, StateToken::new("{init-7.12.0}"));

    // a restarted process builds the plan again
    let plan = copied_span_plan();
    assert!(plan.contains_state(&persisted));

    let store = Arc::new(JsonFileStateStore::new(&path));
    let mut upgrader = Upgrader::new(plan, store.clone());
    let mut db = Database::default();
    let report = upgrader.run(&mut db).await.unwrap();
    assert_eq!(report.origin, persisted);
    assert_eq!(report.executed, vec!["U2", "U3"]);
    assert_eq!(
        store.load(key).await.unwrap(),
        Some(StateToken::new("{D}"))
    );
}

#[tokio::test]
async fn file_store_resumes_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("migrations.json");

    {
        let store = Arc::new(JsonFileStateStore::new(&path));
        let mut upgrader = Upgrader::new(four_step_plan("core"), store);
        let mut db = Database {
            fail_on: Some("U2"),
            ..Database::default()
        };
        assert!(upgrader.run(&mut db).await.is_err());
        assert_eq!(db.applied, vec!["U1"]);
    }

    let store = Arc::new(JsonFileStateStore::new(&path));
    let mut upgrader = Upgrader::new(four_step_plan("core"), store.clone());
    assert_eq!(upgrader.pending().await.unwrap(), vec!["U2", "U3", "U4"]);

    let mut db = Database::default();
    let report = upgrader.run(&mut db).await.unwrap();
    assert_eq!(report.executed, vec!["U2", "U3", "U4"]);

    let entries = store.entries().await.unwrap();
    assert_eq!(
        entries["Migrations.State+core"].state,
        StateToken::new("{S4}")
    );
}

#[tokio::test]
async fn detected_legacy_version_starts_from_its_init_state() {
    let store = Arc::new(MemoryStateStore::new());
    let mut upgrader = Upgrader::new(legacy_plan(), store.clone())
        .with_detector(detector(), Arc::new(StaticVersion::new("7.10.1")));

    assert_eq!(
        upgrader.origin().await.unwrap(),
        StateToken::new("{init-7.10.1}")
    );

    let mut db = Database::default();
    let report = upgrader.run(&mut db).await.unwrap();
    assert_eq!(report.origin, StateToken::new("{init-7.10.1}"));
    assert_eq!(db.applied, vec!["AddLockObjects", "AddContentNuTable"]);
    assert_eq!(
        store.load("Migrations.State+Cms.Core").await.unwrap(),
        Some(StateToken::new("{N}"))
    );

    // history now exists, so the version is no longer consulted
    let report = upgrader.run(&mut db).await.unwrap();
    assert!(report.was_up_to_date());
}

#[tokio::test]
async fn current_version_records_the_final_state_without_running() {
    let store = Arc::new(MemoryStateStore::new());
    let mut upgrader = Upgrader::new(legacy_plan(), store.clone())
        .with_detector(detector(), Arc::new(StaticVersion::new("8.0.0")));

    let mut db = Database::default();
    let report = upgrader.run(&mut db).await.unwrap();
    assert!(report.executed.is_empty());
    assert!(db.applied.is_empty());
    assert_eq!(
        store.load("Migrations.State+Cms.Core").await.unwrap(),
        Some(StateToken::new("{N}"))
    );
}

#[tokio::test]
async fn rejected_version_runs_nothing() {
    let store = Arc::new(MemoryStateStore::new());
    let mut upgrader = Upgrader::new(legacy_plan(), store.clone())
        .with_detector(detector(), Arc::new(StaticVersion::new("9.0.0")));

    let mut db = Database::default();
    let err = upgrader.run(&mut db).await.unwrap_err();
    assert!(matches!(
        err,
        PlanError::VersionDetection(VersionDetectionError::UnsupportedMajorLine(_))
    ));
    assert_eq!(upgrader.status(), RunStatus::Failed);
    assert!(db.applied.is_empty());
    assert!(store.keys().await.is_empty());
}

#[tokio::test]
async fn distinct_plans_run_concurrently_with_separate_histories() {
    let store = Arc::new(MemoryStateStore::new());
    store.seed("Migrations.State+forms", "{S3}").await;

    let tasks: Vec<_> = ["core", "forms"]
        .into_iter()
        .map(|name| {
            let mut upgrader = Upgrader::new(four_step_plan(name), store.clone());
            tokio::spawn(async move {
                let mut db = Database::default();
                upgrader.run(&mut db).await.map(|_| db.applied)
            })
        })
        .collect();

    let mut applied = Vec::new();
    for task in tasks {
        applied.push(task.await.unwrap().unwrap());
    }
    assert_eq!(applied[0], vec!["U1", "U2", "U3", "U4"]);
    assert_eq!(applied[1], vec!["U4"]);

    for key in ["Migrations.State+core", "Migrations.State+forms"] {
        assert_eq!(
            store.load(key).await.unwrap(),
            Some(StateToken::new("{S4}"))
        );
    }
}

#[tokio::test]
async fn custom_state_key_prefix_isolates_histories() {
    let store = Arc::new(MemoryStateStore::new());
    store.seed("Migrations.State+core", "{S4}").await;

    let mut upgrader = Upgrader::new(four_step_plan("core"), store.clone())
        .with_config(UpgradeConfig::new().state_key_prefix("Tenant42.State+"));
    assert_eq!(upgrader.state_key(), "Tenant42.State+core");

    let mut db = Database::default();
    let report = upgrader.run(&mut db).await.unwrap();
    assert_eq!(report.executed.len(), 4);
    assert!(store.entry("Tenant42.State+core").await.is_some());
}

#[tokio::test]
async fn unbound_units_fail_instead_of_being_skipped() {
    let definition = PlanDefinition::from_json(
        r#"{
            "name": "docs",
            "declarations": [
                { "op": "from", "state": "" },
                { "op": "chain", "unit": "CreateTables", "state": "{T}" }
            ]
        }"#,
    )
    .unwrap();
    let plan = Arc::new(definition.build_unbound::<Database>().unwrap());

    let store = Arc::new(MemoryStateStore::new());
    let mut upgrader = Upgrader::new(plan, store.clone());
    let err = upgrader.run(&mut Database::default()).await.unwrap_err();
    assert!(matches!(
        err,
        PlanError::Execution(ExecutionError::UnitFailed { .. })
    ));
    assert_eq!(store.load("Migrations.State+docs").await.unwrap(), None);
}
