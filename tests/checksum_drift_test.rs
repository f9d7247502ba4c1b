mod common;

use common::*;
use pretty_assertions::assert_eq;
use schemashift::change::ColumnConfig;
use schemashift::change::build::*;
use schemashift::config::MigratorSettings;
use schemashift::{ChangeLog, ChangeSet, ExecType, MigrationError, RunScope};

fn original() -> ChangeSet {
    cs("1").with_change(add_column("T", ColumnConfig::new("NEWCOL", "TYP")))
}

fn edited() -> ChangeSet {
    original().with_change(add_column("T", ColumnConfig::new("NEWCOL2", "TYP")))
}

fn log(change_set: ChangeSet) -> ChangeLog {
    ChangeLog::new("changelog.json").with_change_set(change_set)
}

#[test]
fn test_edited_change_set_fails_before_anything_runs() {
    let target = MemoryTarget::new("sqlite");
    let migrator = target.migrator();
    migrator.update(&log(original()), &RunScope::new(), None).unwrap();
    let stored = migrator.history().unwrap()[0].checksum.clone().unwrap();
    assert_eq!(&stored, original().checksum());
    target.database.reset_journal();

    let changed = log(edited()).with_change_set(cs("2").with_change(sql("SELECT 2")));
    let err = migrator.update(&changed, &RunScope::new(), None).unwrap_err();
    match err {
        MigrationError::Validation(errors) => assert!(errors.has_checksum_drift()),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(target.database.journal().is_empty());
    assert_eq!(migrator.history().unwrap().len(), 1);
}

#[test]
fn test_run_on_change_reruns_with_new_checksum() {
    let target = MemoryTarget::new("sqlite");
    let migrator = target.migrator();
    migrator.update(&log(original()), &RunScope::new(), None).unwrap();
    target.database.reset_journal();

    let rerun = edited().run_on_change(true);
    assert_eq!(migrator.update(&log(rerun.clone()), &RunScope::new(), None).unwrap(), 1);
    assert_eq!(
        target.database.executed_sql(),
        vec!["ALTER TABLE T ADD COLUMN NEWCOL TYP", "ALTER TABLE T ADD COLUMN NEWCOL2 TYP"]
    );

    let history = migrator.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].exec_type, ExecType::Reran);
    assert_eq!(history[0].checksum.as_ref(), Some(rerun.checksum()));

    // Unchanged since the rerun: nothing to do
    assert_eq!(migrator.update(&log(rerun), &RunScope::new(), None).unwrap(), 0);
}

#[test]
fn test_cleared_checksums_are_upgraded_without_running() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let create = cs("0").with_change(create_table("T", vec![ColumnConfig::new("id", "INTEGER")]));
    let original_log = ChangeLog::new("changelog.json")
        .with_change_set(create.clone())
        .with_change_set(original());
    migrator.update(&original_log, &RunScope::new(), None).unwrap();

    assert_eq!(migrator.clear_checksums().unwrap(), 2);
    assert!(migrator.history().unwrap().iter().all(|row| row.checksum.is_none()));

    let edited_log = ChangeLog::new("changelog.json")
        .with_change_set(create)
        .with_change_set(edited());
    assert_eq!(migrator.update(&edited_log, &RunScope::new(), None).unwrap(), 0);
    assert_eq!(db.columns("T"), vec!["id", "NEWCOL"]);

    let history = migrator.history().unwrap();
    assert_eq!(history[1].checksum.as_ref(), Some(edited().checksum()));
    // The upgraded checksum is now enforced again
    let err = migrator.update(&log(original()), &RunScope::new(), None).unwrap_err();
    assert!(matches!(err, MigrationError::Validation(ref e) if e.has_checksum_drift()));
}

#[test]
fn test_ignore_checksums_setting() {
    let target = MemoryTarget::new("sqlite");
    target
        .migrator()
        .update(&log(original()), &RunScope::new(), None)
        .unwrap();

    let lenient = target.migrator_with(MigratorSettings {
        ignore_checksums: true,
        ..MigratorSettings::default()
    });
    assert_eq!(lenient.update(&log(edited()), &RunScope::new(), None).unwrap(), 0);
    assert!(lenient.validate(&log(edited()), &RunScope::new()).is_ok());
    assert!(target.migrator().validate(&log(edited()), &RunScope::new()).is_err());
}
