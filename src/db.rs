use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_FILE_NAME: &str = "progress.sqlite3";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}

/// Opens (and if needed creates) the workspace database and brings the
/// schema up to date. Returns the path the engine pool should connect to.
pub fn open_db(workspace: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!("failed to create workspace {}", workspace.to_string_lossy())
    })?;
    let path = db_path(workspace);
    let conn = connect(&path)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .context("failed to enable WAL journal")?;
    ensure_schema(&conn)?;
    seed_levels(&conn)?;
    Ok(path)
}

pub fn connect(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database {}", path.to_string_lossy()))?;
    configure(&conn)?;
    Ok(conn)
}

/// Per-connection settings; shared with the pool's connection init.
pub fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Stand-in roster for the external student directory.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            level INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            xp_required INTEGER NOT NULL UNIQUE,
            benefits TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS xp_ledger(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            reason TEXT NOT NULL,
            note TEXT,
            occurred_at TEXT NOT NULL,
            UNIQUE(student_id, seq)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_xp_ledger_student_time ON xp_ledger(student_id, occurred_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_progress(
            student_id TEXT PRIMARY KEY,
            total_xp INTEGER NOT NULL DEFAULT 0,
            level INTEGER NOT NULL DEFAULT 1,
            level_name TEXT NOT NULL DEFAULT '',
            attendance_streak INTEGER NOT NULL DEFAULT 0,
            attendance_last_date TEXT,
            attendance_epoch INTEGER NOT NULL DEFAULT 0,
            assignment_streak INTEGER NOT NULL DEFAULT 0,
            assignment_last_date TEXT,
            assignment_epoch INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS processed_events(
            student_id TEXT NOT NULL,
            event_key TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            PRIMARY KEY(student_id, event_key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS badges(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            icon TEXT NOT NULL DEFAULT '',
            xp_reward INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            repeatable INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS achievements(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            rule_id TEXT NOT NULL,
            occurrence INTEGER NOT NULL DEFAULT 0,
            badge_id TEXT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            xp_reward INTEGER NOT NULL DEFAULT 0,
            granted_by TEXT,
            earned_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_achievements_rule_key
           ON achievements(student_id, rule_id, occurrence)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_achievements_badge ON achievements(badge_id)",
        [],
    )?;

    Ok(())
}

const LEVELS_SEEDED_KEY: &str = "levels.seeded";

fn seed_levels(conn: &Connection) -> anyhow::Result<()> {
    if settings_get_json(conn, LEVELS_SEEDED_KEY)?.is_some() {
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    let existing: i64 = tx.query_row("SELECT COUNT(*) FROM levels", [], |r| r.get(0))?;
    if existing == 0 {
        for def in crate::levels::default_levels() {
            tx.execute(
                "INSERT INTO levels(level, name, xp_required, benefits) VALUES(?, ?, ?, ?)",
                (def.level, &def.name, def.xp_required, &def.benefits),
            )?;
        }
    }
    settings_set_json(&tx, LEVELS_SEEDED_KEY, &serde_json::json!(true))?;
    tx.commit()?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
