use crate::awards::{self, Achievement, BadgeGrant, Revocation, TriggerContext};
use crate::badges::{self, BadgeDefinition, BadgePatch, NewBadge};
use crate::config::{self, EngineConfig};
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::events::ProgressEvent;
use crate::ledger::{self, LedgerDigest, XpLedgerEntry, XpReason};
use crate::levels::{self, LevelDefinition, LevelTable};
use crate::locks::StudentLocks;
use crate::pool::{self, ConnectionPool};
use crate::progress::{self, ReconcileReport, StudentProgress};
use crate::streak::{self, StreakKind, StreakOutcome};
use crate::students::{self, RosterDirectory, RosterStudent, StudentDirectory};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-transaction view of configuration, read under the write lock so a
/// concurrent `config.update` or `levels.replace` is never half-applied.
struct WriteContext {
    config: EngineConfig,
    levels: LevelTable,
    now: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakUpdate {
    pub kind: StreakKind,
    pub outcome: StreakOutcome,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub student_id: String,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_key: Option<String>,
    pub xp_granted: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak: Option<StreakUpdate>,
    pub achievements: Vec<Achievement>,
    pub level_up: bool,
    pub progress: StudentProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustOutcome {
    pub entry: XpLedgerEntry,
    pub achievements: Vec<Achievement>,
    pub progress: StudentProgress,
}

pub struct Engine {
    workspace: PathBuf,
    db_path: PathBuf,
    pool: ConnectionPool,
    locks: StudentLocks,
    directory: Box<dyn StudentDirectory>,
}

impl Engine {
    /// Opens the workspace database and resolves students through the
    /// workspace roster.
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        Self::open_with_directory(workspace, RosterDirectory)
    }

    pub fn open_with_directory(
        workspace: &Path,
        directory: impl StudentDirectory + 'static,
    ) -> anyhow::Result<Self> {
        let path = db::open_db(workspace)?;
        tracing::info!(db = %path.display(), "progress workspace opened");
        let pool = pool::build(&path)?;
        Ok(Self {
            workspace: workspace.to_path_buf(),
            db_path: path,
            pool,
            locks: StudentLocks::new(),
            directory: Box::new(directory),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        let mut conn = self.pool.get()?;
        // One read transaction gives a consistent snapshot across tables.
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>, &str) -> EngineResult<T>) -> EngineResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx, &Self::now())?;
        tx.commit()?;
        Ok(out)
    }

    fn ensure_student(&self, student_id: &str) -> EngineResult<()> {
        let conn = self.pool.get()?;
        if self.directory.contains(&conn, student_id)? {
            Ok(())
        } else {
            Err(EngineError::UnknownStudent(student_id.to_string()))
        }
    }

    /// Runs `op` in one IMMEDIATE transaction under the student's lock,
    /// retrying the whole operation on conflicts.
    fn write_for_student<T>(
        &self,
        student_id: &str,
        mut op: impl FnMut(&Transaction<'_>, &WriteContext) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let policy = self.read(|conn| config::load(conn))?.retry;
        self.locks.with_student(student_id, || {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self.try_write_for_student(&mut op) {
                    Err(e) if e.is_conflict() && attempt < policy.max_attempts => {
                        tracing::warn!(student_id, attempt, "write conflict; retrying");
                        std::thread::sleep(Duration::from_millis(
                            policy.backoff_ms.saturating_mul(attempt as u64),
                        ));
                    }
                    Err(e) if e.is_conflict() => {
                        return Err(EngineError::ConcurrencyConflict {
                            student_id: student_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    other => return other,
                }
            }
        })
    }

    fn try_write_for_student<T>(
        &self,
        op: &mut impl FnMut(&Transaction<'_>, &WriteContext) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ctx = WriteContext {
            config: config::load(&tx)?,
            levels: levels::load_table(&tx)?,
            now: Self::now(),
        };
        let out = op(&tx, &ctx)?;
        tx.commit()?;
        Ok(out)
    }

    /// `ApplyEvent`. Validation and the student lookup happen before any
    /// write; everything after is one transaction.
    pub fn apply_event(
        &self,
        student_id: &str,
        event: &ProgressEvent,
        delivery_key: Option<&str>,
    ) -> EngineResult<ApplyOutcome> {
        event.validate()?;
        if delivery_key.is_some_and(|k| k.trim().is_empty()) {
            return Err(EngineError::InvalidEvent(
                "delivery key must not be blank".to_string(),
            ));
        }
        self.ensure_student(student_id)?;
        let event_key = delivery_key
            .map(|k| k.trim().to_string())
            .or_else(|| event.natural_key());

        let outcome = self.write_for_student(student_id, |tx, ctx| {
            apply_in_tx(tx, ctx, student_id, event, event_key.as_deref())
        })?;
        if outcome.duplicate {
            tracing::debug!(student_id, event_key = ?outcome.event_key, "duplicate delivery ignored");
        } else {
            tracing::info!(
                student_id,
                event = event.kind(),
                xp = outcome.xp_granted,
                total_xp = outcome.progress.total_xp,
                level = outcome.progress.level,
                awards = outcome.achievements.len(),
                "event applied"
            );
        }
        Ok(outcome)
    }

    /// `GetProgress`.
    pub fn get_progress(&self, student_id: &str) -> EngineResult<StudentProgress> {
        self.ensure_student(student_id)?;
        self.read(|conn| {
            let table = levels::load_table(conn)?;
            progress::read(conn, student_id, &table)
        })
    }

    /// Offsetting MANUAL entry; may be negative but never takes the total
    /// below zero.
    pub fn adjust_xp(&self, student_id: &str, delta: i64, note: &str) -> EngineResult<AdjustOutcome> {
        if delta == 0 {
            return Err(EngineError::InvalidEvent("adjustment must not be zero".to_string()));
        }
        if note.trim().is_empty() {
            return Err(EngineError::InvalidEvent(
                "an adjustment needs a note explaining it".to_string(),
            ));
        }
        self.ensure_student(student_id)?;
        let outcome = self.write_for_student(student_id, |tx, ctx| {
            progress::ensure_row(tx, student_id, &ctx.levels)?;
            let entry = ledger::append(
                tx,
                student_id,
                delta,
                XpReason::Manual,
                Some(note.trim()),
                &ctx.now,
            )?;
            let achievements = awards::evaluate_rules(
                tx,
                student_id,
                &ctx.config.rules,
                TriggerContext::Event("xpAdjustment"),
                &ctx.now,
            )?;
            let total = ledger::total_xp(tx, student_id)?;
            progress::store_total(tx, student_id, total, &ctx.levels, &ctx.now)?;
            Ok(AdjustOutcome {
                entry,
                achievements,
                progress: progress::read(tx, student_id, &ctx.levels)?,
            })
        })?;
        tracing::info!(student_id, delta, total_xp = outcome.progress.total_xp, "xp adjusted");
        Ok(outcome)
    }

    /// `EvaluateRules` outside an event, e.g. after new rules were configured.
    pub fn evaluate_rules(&self, student_id: &str) -> EngineResult<Vec<Achievement>> {
        self.ensure_student(student_id)?;
        self.write_for_student(student_id, |tx, ctx| {
            progress::ensure_row(tx, student_id, &ctx.levels)?;
            let awarded = awards::evaluate_rules(
                tx,
                student_id,
                &ctx.config.rules,
                TriggerContext::Reevaluation,
                &ctx.now,
            )?;
            let total = ledger::total_xp(tx, student_id)?;
            progress::store_total(tx, student_id, total, &ctx.levels, &ctx.now)?;
            Ok(awarded)
        })
    }

    /// `GrantBadge`.
    pub fn grant_badge(
        &self,
        student_id: &str,
        badge_id: &str,
        granted_by: &str,
    ) -> EngineResult<BadgeGrant> {
        if granted_by.trim().is_empty() {
            return Err(EngineError::InvalidEvent("grantedBy must not be empty".to_string()));
        }
        self.ensure_student(student_id)?;
        self.write_for_student(student_id, |tx, ctx| {
            let badge = badges::get(tx, badge_id)?;
            progress::ensure_row(tx, student_id, &ctx.levels)?;
            let grant = awards::grant_badge(tx, student_id, &badge, granted_by.trim(), &ctx.now)?;
            if grant.newly_awarded {
                awards::evaluate_rules(
                    tx,
                    student_id,
                    &ctx.config.rules,
                    TriggerContext::BadgeGrant,
                    &ctx.now,
                )?;
            }
            let total = ledger::total_xp(tx, student_id)?;
            progress::store_total(tx, student_id, total, &ctx.levels, &ctx.now)?;
            Ok(grant)
        })
    }

    pub fn revoke_achievement(
        &self,
        student_id: &str,
        achievement_id: &str,
    ) -> EngineResult<Revocation> {
        self.ensure_student(student_id)?;
        self.write_for_student(student_id, |tx, ctx| {
            progress::ensure_row(tx, student_id, &ctx.levels)?;
            let revocation = awards::revoke(tx, student_id, achievement_id, &ctx.now)?;
            let total = ledger::total_xp(tx, student_id)?;
            progress::store_total(tx, student_id, total, &ctx.levels, &ctx.now)?;
            Ok(revocation)
        })
    }

    /// `ListAchievements`, newest first.
    pub fn list_achievements(&self, student_id: &str) -> EngineResult<Vec<Achievement>> {
        self.read(|conn| awards::list(conn, student_id))
    }

    pub fn list_ledger(&self, student_id: &str) -> EngineResult<Vec<XpLedgerEntry>> {
        self.read(|conn| ledger::list_entries(conn, student_id))
    }

    pub fn ledger_digest(&self, student_id: &str) -> EngineResult<LedgerDigest> {
        self.read(|conn| ledger::digest(conn, student_id))
    }

    pub fn reconcile(&self, student_id: &str) -> EngineResult<ReconcileReport> {
        self.write_for_student(student_id, |tx, ctx| {
            progress::reconcile(tx, student_id, &ctx.levels, &ctx.now)
        })
    }

    pub fn reconcile_all(&self) -> EngineResult<Vec<ReconcileReport>> {
        let ids: Vec<String> = self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT student_id FROM student_progress
                 UNION SELECT DISTINCT student_id FROM xp_ledger
                 ORDER BY 1",
            )?;
            let ids = stmt
                .query_map([], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;
        ids.iter().map(|id| self.reconcile(id)).collect()
    }

    pub fn list_badges(&self, include_inactive: bool) -> EngineResult<Vec<BadgeDefinition>> {
        self.read(|conn| badges::list(conn, include_inactive))
    }

    pub fn get_badge(&self, badge_id: &str) -> EngineResult<BadgeDefinition> {
        self.read(|conn| badges::get(conn, badge_id))
    }

    pub fn create_badge(&self, badge: &NewBadge) -> EngineResult<BadgeDefinition> {
        self.write(|tx, now| badges::create(tx, badge, now))
    }

    pub fn update_badge(&self, badge_id: &str, patch: &BadgePatch) -> EngineResult<BadgeDefinition> {
        self.write(|tx, now| badges::update(tx, badge_id, patch, now))
    }

    /// Fails with `BadgeInUse` once awarded; award rules that point at the
    /// badge must be removed first.
    pub fn delete_badge(&self, badge_id: &str) -> EngineResult<()> {
        self.write(|tx, _| {
            let cfg = config::load(tx)?;
            if let Some(rule) = cfg
                .rules
                .iter()
                .find(|r| r.badge_id.as_deref() == Some(badge_id))
            {
                return Err(EngineError::Configuration(format!(
                    "badge {} is referenced by award rule {}",
                    badge_id, rule.id
                )));
            }
            badges::delete(tx, badge_id)
        })
    }

    pub fn level_table(&self) -> EngineResult<LevelTable> {
        self.read(levels::load_table)
    }

    pub fn replace_levels(&self, defs: Vec<LevelDefinition>) -> EngineResult<LevelTable> {
        let table = LevelTable::new(defs)?;
        let mut conn = self.pool.get()?;
        let students = levels::replace_table(&mut conn, &table)?;
        tracing::info!(levels = table.levels().len(), students, "level table replaced");
        Ok(table)
    }

    pub fn config(&self) -> EngineResult<EngineConfig> {
        self.read(config::load)
    }

    pub fn update_config(&self, cfg: &EngineConfig) -> EngineResult<()> {
        cfg.validate()?;
        self.write(|tx, _| {
            for rule in &cfg.rules {
                if let Some(badge_id) = &rule.badge_id {
                    if badges::find(tx, badge_id)?.is_none() {
                        return Err(EngineError::Configuration(format!(
                            "award rule {} references unknown badge {}",
                            rule.id, badge_id
                        )));
                    }
                }
            }
            config::save(tx, cfg)
        })?;
        tracing::info!(rules = cfg.rules.len(), "engine config updated");
        Ok(())
    }

    /// Folds the WAL into the main database file.
    pub fn checkpoint(&self) -> EngineResult<()> {
        let conn = self.pool.get()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn register_student(
        &self,
        student_id: &str,
        display_name: &str,
        active: bool,
    ) -> EngineResult<RosterStudent> {
        self.write(|tx, now| students::register(tx, student_id.trim(), display_name, active, now))
    }

    pub fn list_students(&self) -> EngineResult<Vec<RosterStudent>> {
        self.read(students::list)
    }
}

fn apply_in_tx(
    tx: &Transaction<'_>,
    ctx: &WriteContext,
    student_id: &str,
    event: &ProgressEvent,
    event_key: Option<&str>,
) -> EngineResult<ApplyOutcome> {
    if let Some(key) = event_key {
        let seen = tx
            .query_row(
                "SELECT 1 FROM processed_events WHERE student_id = ? AND event_key = ?",
                (student_id, key),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if seen {
            return Ok(ApplyOutcome {
                student_id: student_id.to_string(),
                duplicate: true,
                event_key: Some(key.to_string()),
                xp_granted: 0,
                streak: None,
                achievements: Vec::new(),
                level_up: false,
                progress: progress::read(tx, student_id, &ctx.levels)?,
            });
        }
        tx.execute(
            "INSERT INTO processed_events(student_id, event_key, applied_at) VALUES(?, ?, ?)",
            (student_id, key, &ctx.now),
        )?;
    }

    // Rebuilds the cache first if it drifted from the ledger.
    let before = progress::reconcile(tx, student_id, &ctx.levels, &ctx.now)?;
    let level_before = ctx.levels.resolve(before.ledger_xp).level;

    let effect = event.effect(&ctx.config);
    if effect.xp > 0 {
        ledger::append(
            tx,
            student_id,
            effect.xp,
            effect.reason,
            effect.note.as_deref(),
            &ctx.now,
        )?;
    }

    let streak = match effect.streak {
        Some((kind, date)) => {
            let (state, outcome) = streak::update_streak(tx, student_id, kind, date)?;
            Some(StreakUpdate {
                kind,
                outcome,
                count: state.count,
            })
        }
        None => None,
    };

    let achievements = awards::evaluate_rules(
        tx,
        student_id,
        &ctx.config.rules,
        TriggerContext::Event(event.kind()),
        &ctx.now,
    )?;

    let total = ledger::total_xp(tx, student_id)?;
    progress::store_total(tx, student_id, total, &ctx.levels, &ctx.now)?;
    let progress = progress::read(tx, student_id, &ctx.levels)?;

    Ok(ApplyOutcome {
        student_id: student_id.to_string(),
        duplicate: false,
        event_key: event_key.map(|k| k.to_string()),
        xp_granted: effect.xp,
        streak,
        achievements,
        level_up: progress.level > level_before,
        progress,
    })
}
