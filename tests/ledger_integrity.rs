use chrono::NaiveDate;
use progressd::config::EngineConfig;
use progressd::levels::LevelDefinition;
use progressd::students::FixedDirectory;
use progressd::{AttendanceStatus, Engine, EngineError, ProgressEvent};
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn present(d: u32) -> ProgressEvent {
    ProgressEvent::AttendanceMarked {
        status: AttendanceStatus::Present,
        date: NaiveDate::from_ymd_opt(2026, 5, d).expect("valid date"),
        subject_id: None,
    }
}

fn open_engine(prefix: &str) -> (PathBuf, Engine) {
    let workspace = temp_dir(prefix);
    let engine = Engine::open_with_directory(&workspace, FixedDirectory::new(["s1", "s2"]))
        .expect("open engine");
    let mut cfg = EngineConfig::default();
    cfg.attendance.present_xp = 60;
    cfg.rules.clear();
    engine.update_config(&cfg).expect("update config");
    (workspace, engine)
}

#[test]
fn external_directory_resolves_students_without_roster() {
    let (workspace, engine) = open_engine("ledger-fixed-directory");
    assert!(engine.list_students().expect("roster").is_empty());
    engine.apply_event("s1", &present(1), None).expect("apply");
    assert!(matches!(
        engine.apply_event("s3", &present(1), None),
        Err(EngineError::UnknownStudent(_))
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tampered_cache_is_rebuilt_from_ledger() {
    let (workspace, engine) = open_engine("ledger-reconcile");
    for d in 1..=3 {
        engine.apply_event("s1", &present(d), None).expect("apply");
    }
    assert!(!engine.reconcile("s1").expect("clean reconcile").diverged);

    let conn = Connection::open(engine.db_path()).expect("open raw connection");
    conn.execute(
        "UPDATE student_progress SET total_xp = 9999, level = 5 WHERE student_id = 's1'",
        [],
    )
    .expect("tamper");
    drop(conn);

    // Reads resolve from the ledger, never from the cached row.
    let progress = engine.get_progress("s1").expect("progress");
    assert_eq!(progress.total_xp, 180);
    assert_eq!(progress.level, 2);

    let report = engine.reconcile("s1").expect("reconcile");
    assert!(report.diverged);
    assert_eq!(report.cached_xp, Some(9999));
    assert_eq!(report.ledger_xp, 180);
    assert!(!engine.reconcile("s1").expect("second reconcile").diverged);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn digest_tracks_ledger_history() {
    let (workspace, engine) = open_engine("ledger-digest");
    let empty = engine.ledger_digest("s1").expect("empty digest");
    assert_eq!(empty.entry_count, 0);
    assert_eq!(empty.total_xp, 0);

    engine.apply_event("s1", &present(1), None).expect("apply");
    let one = engine.ledger_digest("s1").expect("digest");
    assert_eq!(one.entry_count, 1);
    assert_eq!(one.total_xp, 60);
    assert_eq!(one.sha256.len(), 64);
    assert_ne!(one.sha256, empty.sha256);

    // Duplicates do not touch the ledger.
    engine.apply_event("s1", &present(1), None).expect("redeliver");
    assert_eq!(engine.ledger_digest("s1").expect("digest"), one);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn level_table_replacement_re_resolves_students() {
    let (workspace, engine) = open_engine("ledger-level-replace");
    for d in 1..=2 {
        engine.apply_event("s1", &present(d), None).expect("apply");
    }
    // Default thresholds: 120 XP is Apprentice.
    assert_eq!(engine.get_progress("s1").expect("progress").level, 2);

    engine
        .replace_levels(vec![
            LevelDefinition::new(1, "Bronze", 0, ""),
            LevelDefinition::new(2, "Silver", 50, "extra recess"),
            LevelDefinition::new(3, "Gold", 100, ""),
            LevelDefinition::new(4, "Platinum", 1000, ""),
        ])
        .expect("replace");
    let progress = engine.get_progress("s1").expect("progress");
    assert_eq!(progress.level, 3);
    assert_eq!(progress.level_name, "Gold");

    let conn = Connection::open(engine.db_path()).expect("open raw connection");
    let cached: (i64, String) = conn
        .query_row(
            "SELECT level, level_name FROM student_progress WHERE student_id = 's1'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("cached level");
    assert_eq!(cached, (3, "Gold".to_string()));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_level_tables_are_rejected() {
    let (workspace, engine) = open_engine("ledger-level-invalid");
    let bad_tables = vec![
        vec![],
        vec![LevelDefinition::new(1, "Start", 10, "")],
        vec![
            LevelDefinition::new(1, "Start", 0, ""),
            LevelDefinition::new(2, "Flat", 0, ""),
        ],
        vec![
            LevelDefinition::new(1, "Start", 0, ""),
            LevelDefinition::new(2, " ", 100, ""),
        ],
    ];
    for table in bad_tables {
        assert!(matches!(
            engine.replace_levels(table),
            Err(EngineError::Configuration(_))
        ));
    }
    assert_eq!(engine.level_table().expect("table").levels().len(), 5);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn missing_level_table_fails_loudly() {
    let (workspace, engine) = open_engine("ledger-level-missing");
    engine.apply_event("s1", &present(1), None).expect("apply");

    let conn = Connection::open(engine.db_path()).expect("open raw connection");
    conn.execute("DELETE FROM levels", []).expect("drop levels");
    drop(conn);

    assert!(matches!(
        engine.get_progress("s1"),
        Err(EngineError::Configuration(_))
    ));
    assert!(matches!(
        engine.apply_event("s1", &present(2), None),
        Err(EngineError::Configuration(_))
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_config_is_rejected_and_not_stored() {
    let (workspace, engine) = open_engine("ledger-config-invalid");
    let before = engine.config().expect("config");

    let mut cfg = before.clone();
    cfg.attendance.present_xp = -1;
    assert!(matches!(
        engine.update_config(&cfg),
        Err(EngineError::Configuration(_))
    ));

    let mut cfg = before.clone();
    cfg.retry.max_attempts = 0;
    assert!(engine.update_config(&cfg).is_err());

    assert_eq!(engine.config().expect("config"), before);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn progress_survives_reopen() {
    let workspace = temp_dir("ledger-reopen");
    {
        let engine = Engine::open_with_directory(&workspace, FixedDirectory::new(["s1"]))
            .expect("open engine");
        engine.apply_event("s1", &present(1), None).expect("apply");
        engine.apply_event("s1", &present(2), None).expect("apply");
    }
    let engine = Engine::open_with_directory(&workspace, FixedDirectory::new(["s1"]))
        .expect("reopen engine");
    let progress = engine.get_progress("s1").expect("progress");
    assert_eq!(progress.total_xp, 20);
    assert_eq!(progress.attendance_streak, 2);
    let again = engine.apply_event("s1", &present(2), None).expect("redeliver");
    assert!(again.duplicate);

    let _ = std::fs::remove_dir_all(workspace);
}
