mod common;

use common::*;
use pretty_assertions::assert_eq;
use schemashift::change::ColumnConfig;
use schemashift::change::build::*;
use schemashift::{ChangeLog, ExecType, MigrationError, RunScope};

#[test]
fn test_update_applies_in_order_and_is_idempotent() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");

    let applied = migrator.update(&three_tables(), &RunScope::new(), None).unwrap();
    assert_eq!(applied, 3);
    assert!(db.table_exists("t_a"));
    assert!(db.table_exists("t_b"));
    assert!(db.table_exists("t_c"));
    assert_eq!(db.ledger_ids(), vec!["A", "B", "C"]);

    // Nothing is pending the second time round
    assert_eq!(migrator.update(&three_tables(), &RunScope::new(), None).unwrap(), 0);
    assert!(migrator.list_pending(&three_tables(), &RunScope::new()).unwrap().is_empty());

    let history = migrator.history().unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|row| row.exec_type == ExecType::Executed));
    let orders: Vec<i64> = history.iter().map(|row| row.order_executed).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    assert!(migrator.list_locks().unwrap().is_empty());
}

#[test]
fn test_update_with_count() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");

    assert_eq!(migrator.update(&three_tables(), &RunScope::new(), Some(2)).unwrap(), 2);
    assert_eq!(db.ledger_ids(), vec!["A", "B"]);
    assert!(!db.table_exists("t_c"));

    let pending = migrator.list_pending(&three_tables(), &RunScope::new()).unwrap();
    assert_eq!(pending.iter().map(|cs| cs.id()).collect::<Vec<_>>(), vec!["C"]);
    assert_eq!(migrator.update(&three_tables(), &RunScope::new(), Some(2)).unwrap(), 1);
}

#[test]
fn test_contexts_and_labels_restrict_the_run() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let log = ChangeLog::new("changelog.json")
        .with_change_set(cs("1").with_change(sql("CREATE TABLE always (id INTEGER)")))
        .with_change_set(
            cs("2")
                .with_change(sql("CREATE TABLE test_data (id INTEGER)"))
                .with_contexts(["test"]),
        )
        .with_change_set(
            cs("3")
                .with_change(sql("CREATE TABLE labelled (id INTEGER)"))
                .with_labels(["reporting"]),
        )
        .with_change_set(
            cs("4")
                .with_change(sql("CREATE TABLE pg_only (id INTEGER)"))
                .with_dbms(["postgresql"]),
        );

    let prod = RunScope::new().with_contexts(["prod"]).with_labels(["billing"]);
    assert_eq!(migrator.update(&log, &prod, None).unwrap(), 1);
    assert!(db.table_exists("always"));
    assert!(!db.table_exists("test_data"));
    assert!(!db.table_exists("labelled"));

    let test = RunScope::new().with_contexts(["test"]);
    assert_eq!(migrator.update(&log, &test, None).unwrap(), 2);
    assert!(db.table_exists("test_data"));
    assert!(db.table_exists("labelled"));
    assert!(!db.table_exists("pg_only"));
}

#[test]
fn test_failed_change_set_is_rolled_back_and_reported() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let log = ChangeLog::new("changelog.json")
        .with_change_set(cs("1").with_change(sql("CREATE TABLE first (id INTEGER)")))
        .with_change_set(
            cs("2")
                .with_change(sql("CREATE TABLE second (id INTEGER)"))
                .with_change(sql("INSERT INTO missing VALUES (1)")),
        )
        .with_change_set(cs("3").with_change(sql("CREATE TABLE third (id INTEGER)")));

    let err = migrator.update(&log, &RunScope::new(), None).unwrap_err();
    match err {
        MigrationError::Execution { change_set, statement, .. } => {
            assert_eq!(change_set.id, "2");
            assert_eq!(statement, "INSERT INTO missing VALUES (1)");
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert!(db.table_exists("first"));
    assert!(!db.table_exists("second"));
    assert!(!db.table_exists("third"));
    assert_eq!(db.ledger_ids(), vec!["1"]);
    assert!(migrator.list_locks().unwrap().is_empty());
}

#[test]
fn test_change_in_own_transaction() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let log = ChangeLog::new("changelog.json").with_change_set(
        cs("1")
            .with_change(sql("CREATE TABLE big (id INTEGER)"))
            .with_change(sql("CREATE INDEX big_id ON big (id)").in_own_transaction())
            .with_change(sql("INSERT INTO big VALUES (1)")),
    );

    assert_eq!(migrator.update(&log, &RunScope::new(), None).unwrap(), 1);
    assert!(db.table_exists("big"));
    let rows: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM big", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(db.ledger_ids(), vec!["1"]);
}

#[test]
fn test_unsupported_change_fails_validation_unless_skipped() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let pk = ColumnConfig::new("pk", "INTEGER").primary_key();
    let base = cs("1").with_change(create_table("users", vec![ColumnConfig::new("id", "INTEGER")]));

    let failing = ChangeLog::new("changelog.json")
        .with_change_set(base.clone())
        .with_change_set(cs("2").with_change(add_column("users", pk.clone())));
    let err = migrator.update(&failing, &RunScope::new(), None).unwrap_err();
    assert!(matches!(err, MigrationError::Validation(_)));
    assert!(!db.table_exists("users"));

    let skipping = ChangeLog::new("changelog.json").with_change_set(base).with_change_set(
        cs("2")
            .with_change(add_column("users", pk).skip_if_unsupported())
            .with_change(add_column("users", ColumnConfig::new("name", "TEXT"))),
    );
    assert_eq!(migrator.update(&skipping, &RunScope::new(), None).unwrap(), 2);
    assert_eq!(db.columns("users"), vec!["id", "name"]);
}

#[test]
fn test_update_sql_touches_nothing() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let lines = migrator.update_sql(&three_tables(), &RunScope::new(), Some(1)).unwrap();
    assert_eq!(
        lines,
        vec![
            "-- Changeset changelog.json::A::tester",
            "CREATE TABLE t_a (id INTEGER NOT NULL, PRIMARY KEY (id));",
        ]
    );
    assert!(!db.table_exists("t_a"));
    assert!(db.ledger_ids().is_empty());
}

#[test]
fn test_sync_then_update_runs_nothing() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    assert_eq!(migrator.sync(&three_tables(), &RunScope::new()).unwrap(), 3);
    assert!(!db.table_exists("t_a"));
    assert_eq!(migrator.update(&three_tables(), &RunScope::new(), None).unwrap(), 0);
    assert!(
        migrator
            .history()
            .unwrap()
            .iter()
            .all(|row| row.exec_type == ExecType::MarkRan)
    );
}

#[test]
fn test_always_run_executes_every_time() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let log = ChangeLog::new("changelog.json")
        .with_change_set(cs("1").with_change(sql("CREATE TABLE counter (n INTEGER)")))
        .with_change_set(
            cs("2")
                .with_change(sql("INSERT INTO counter VALUES (1)"))
                .always_run(true),
        );

    migrator.update(&log, &RunScope::new(), None).unwrap();
    assert_eq!(migrator.update(&log, &RunScope::new(), None).unwrap(), 1);

    let rows: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM counter", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 2);
    let history = migrator.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].exec_type, ExecType::Reran);
}

#[test]
fn test_tag_and_tag_exists() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    assert!(migrator.tag("empty").is_err());

    migrator.update(&three_tables(), &RunScope::new(), None).unwrap();
    migrator.tag("v1.0").unwrap();
    assert!(migrator.tag_exists("v1.0").unwrap());
    assert!(!migrator.tag_exists("v2.0").unwrap());
    assert_eq!(migrator.history().unwrap()[2].tag.as_deref(), Some("v1.0"));
}

#[test]
fn test_change_set_for_another_database_is_skipped() {
    let db = TestDb::new();
    let migrator = db.migrator("instance-a");
    let log = ChangeLog::new("changelog.json")
        .with_change_set(cs("1").with_change(create_table("users", vec![ColumnConfig::new("id", "INTEGER")])))
        .with_change_set(
            cs("2")
                .with_change(sql("CREATE TABLE mysql_only (id INT) ENGINE=InnoDB"))
                .with_dbms(["mysql"]),
        )
        .with_change_set(cs("3").with_change(add_column("users", ColumnConfig::new("name", "TEXT"))));

    assert_eq!(migrator.update(&log, &RunScope::new(), None).unwrap(), 2);
    assert!(!db.table_exists("mysql_only"));
    assert_eq!(db.columns("users"), vec!["id", "name"]);
    assert_eq!(db.ledger_ids(), vec!["1", "3"]);
}
