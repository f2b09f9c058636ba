use crate::badges::{self, BadgeDefinition};
use crate::config::{AwardRule, AwardTrigger};
use crate::error::{EngineError, EngineResult};
use crate::ledger::{self, XpReason};
use crate::streak;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub student_id: String,
    pub rule_id: String,
    pub occurrence: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge_id: Option<String>,
    pub title: String,
    pub description: String,
    pub xp_reward: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<String>,
    pub earned_at: String,
}

/// Why rule evaluation is running; recorded on the reward ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerContext<'a> {
    Event(&'a str),
    BadgeGrant,
    Reevaluation,
}

impl TriggerContext<'_> {
    fn label(&self) -> &str {
        match self {
            TriggerContext::Event(kind) => *kind,
            TriggerContext::BadgeGrant => "badgeGrant",
            TriggerContext::Reevaluation => "reevaluation",
        }
    }
}

pub fn badge_rule_id(badge_id: &str) -> String {
    format!("badge:{}", badge_id)
}

const ACHIEVEMENT_COLUMNS: &str =
    "id, student_id, rule_id, occurrence, badge_id, title, description, xp_reward, granted_by, earned_at";

fn achievement_from_row(r: &Row<'_>) -> rusqlite::Result<Achievement> {
    Ok(Achievement {
        id: r.get(0)?,
        student_id: r.get(1)?,
        rule_id: r.get(2)?,
        occurrence: r.get(3)?,
        badge_id: r.get(4)?,
        title: r.get(5)?,
        description: r.get(6)?,
        xp_reward: r.get(7)?,
        granted_by: r.get(8)?,
        earned_at: r.get(9)?,
    })
}

fn find_by_key(
    conn: &Connection,
    student_id: &str,
    rule_id: &str,
    occurrence: i64,
) -> EngineResult<Option<Achievement>> {
    let sql = format!(
        "SELECT {} FROM achievements WHERE student_id = ? AND rule_id = ? AND occurrence = ?",
        ACHIEVEMENT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (student_id, rule_id, occurrence), achievement_from_row)
        .optional()?)
}

/// Inserts the achievement and its reward entry. The unique index on
/// `(student_id, rule_id, occurrence)` rejects a second writer.
fn record(
    conn: &Connection,
    mut achievement: Achievement,
    trigger: TriggerContext<'_>,
) -> EngineResult<Achievement> {
    achievement.id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO achievements(id, student_id, rule_id, occurrence, badge_id, title, description, xp_reward, granted_by, earned_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &achievement.id,
            &achievement.student_id,
            &achievement.rule_id,
            achievement.occurrence,
            &achievement.badge_id,
            &achievement.title,
            &achievement.description,
            achievement.xp_reward,
            &achievement.granted_by,
            &achievement.earned_at,
        ),
    )?;
    if achievement.xp_reward > 0 {
        let note = format!("{} via {}", achievement.rule_id, trigger.label());
        ledger::append(
            conn,
            &achievement.student_id,
            achievement.xp_reward,
            XpReason::Achievement,
            Some(&note),
            &achievement.earned_at,
        )?;
    }
    tracing::info!(
        student_id = %achievement.student_id,
        rule_id = %achievement.rule_id,
        occurrence = achievement.occurrence,
        xp_reward = achievement.xp_reward,
        "achievement awarded"
    );
    Ok(achievement)
}

/// Occurrence key for a satisfied rule, `None` while the rule is unmet.
fn satisfied_occurrence(
    conn: &Connection,
    student_id: &str,
    rule: &AwardRule,
    total_xp: i64,
) -> EngineResult<Option<i64>> {
    match rule.trigger {
        AwardTrigger::StreakReached { kind, days } => {
            let state = streak::load_state(conn, student_id, kind)?;
            if state.count < days {
                return Ok(None);
            }
            Ok(Some(if rule.repeatable { state.epoch } else { 0 }))
        }
        AwardTrigger::TotalXpReached { xp } => Ok((total_xp >= xp).then_some(0)),
    }
}

/// Any earlier award of the badge, whether from a rule or a manual grant.
fn find_badge_award(
    conn: &Connection,
    student_id: &str,
    badge_id: &str,
) -> EngineResult<Option<Achievement>> {
    let sql = format!(
        "SELECT {} FROM achievements WHERE student_id = ? AND badge_id = ?
         ORDER BY earned_at, rowid LIMIT 1",
        ACHIEVEMENT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (student_id, badge_id), achievement_from_row)
        .optional()?)
}

/// A rule that carries a badge only fires while the badge is active, and a
/// one-time badge is never held twice regardless of which path awarded it.
fn linked_badge_allows(conn: &Connection, student_id: &str, rule: &AwardRule) -> EngineResult<bool> {
    let Some(badge_id) = rule.badge_id.as_deref() else {
        return Ok(true);
    };
    let Some(badge) = badges::find(conn, badge_id)? else {
        tracing::warn!(rule_id = %rule.id, badge_id, "award rule references a missing badge");
        return Ok(false);
    };
    if !badge.is_active {
        return Ok(false);
    }
    if badge.repeatable {
        return Ok(true);
    }
    Ok(find_badge_award(conn, student_id, badge_id)?.is_none())
}

/// `EvaluateRules`: awards every satisfied rule whose key has not been
/// recorded yet. Reward XP can satisfy XP-threshold rules, so evaluation
/// repeats until a pass awards nothing.
pub fn evaluate_rules(
    conn: &Connection,
    student_id: &str,
    rules: &[AwardRule],
    trigger: TriggerContext<'_>,
    now: &str,
) -> EngineResult<Vec<Achievement>> {
    let mut awarded = Vec::new();
    for _ in 0..=rules.len() {
        let total_xp = ledger::total_xp(conn, student_id)?;
        let mut fired = false;
        for rule in rules {
            let Some(occurrence) = satisfied_occurrence(conn, student_id, rule, total_xp)? else {
                continue;
            };
            if find_by_key(conn, student_id, &rule.id, occurrence)?.is_some() {
                continue;
            }
            if !linked_badge_allows(conn, student_id, rule)? {
                continue;
            }
            let achievement = record(
                conn,
                Achievement {
                    id: String::new(),
                    student_id: student_id.to_string(),
                    rule_id: rule.id.clone(),
                    occurrence,
                    badge_id: rule.badge_id.clone(),
                    title: rule.title.clone(),
                    description: rule.description.clone(),
                    xp_reward: rule.xp_reward,
                    granted_by: None,
                    earned_at: now.to_string(),
                },
                trigger,
            )?;
            awarded.push(achievement);
            fired = true;
        }
        if !fired {
            break;
        }
    }
    Ok(awarded)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeGrant {
    pub achievement: Achievement,
    pub newly_awarded: bool,
}

/// Manual grant. One-time badges return the existing award unchanged, even
/// when a rule awarded it; repeatable badges take the next occurrence.
pub fn grant_badge(
    conn: &Connection,
    student_id: &str,
    badge: &BadgeDefinition,
    granted_by: &str,
    now: &str,
) -> EngineResult<BadgeGrant> {
    if !badge.is_active {
        return Err(EngineError::InvalidEvent(format!(
            "badge {} is inactive",
            badge.id
        )));
    }
    let rule_id = badge_rule_id(&badge.id);
    let occurrence = if badge.repeatable {
        conn.query_row(
            "SELECT COALESCE(MAX(occurrence), 0) + 1 FROM achievements WHERE student_id = ? AND rule_id = ?",
            (student_id, &rule_id),
            |r| r.get::<_, i64>(0),
        )?
    } else {
        if let Some(existing) = find_badge_award(conn, student_id, &badge.id)? {
            tracing::debug!(student_id, badge_id = %badge.id, "badge already granted");
            return Ok(BadgeGrant {
                achievement: existing,
                newly_awarded: false,
            });
        }
        0
    };
    let achievement = record(
        conn,
        Achievement {
            id: String::new(),
            student_id: student_id.to_string(),
            rule_id,
            occurrence,
            badge_id: Some(badge.id.clone()),
            title: badge.name.clone(),
            description: badge.description.clone(),
            xp_reward: badge.xp_reward,
            granted_by: Some(granted_by.to_string()),
            earned_at: now.to_string(),
        },
        TriggerContext::BadgeGrant,
    )?;
    Ok(BadgeGrant {
        achievement,
        newly_awarded: true,
    })
}

/// `ListAchievements`: newest first.
pub fn list(conn: &Connection, student_id: &str) -> EngineResult<Vec<Achievement>> {
    let sql = format!(
        "SELECT {} FROM achievements WHERE student_id = ? ORDER BY earned_at DESC, rowid DESC",
        ACHIEVEMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], achievement_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revocation {
    pub achievement: Achievement,
    pub xp_reversed: i64,
}

/// Admin removal of one award. The reward is reversed by an offsetting
/// entry, clamped so the total never drops below zero.
pub fn revoke(
    conn: &Connection,
    student_id: &str,
    achievement_id: &str,
    now: &str,
) -> EngineResult<Revocation> {
    let sql = format!(
        "SELECT {} FROM achievements WHERE id = ? AND student_id = ?",
        ACHIEVEMENT_COLUMNS
    );
    let achievement = conn
        .query_row(&sql, (achievement_id, student_id), achievement_from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found("achievement", achievement_id))?;
    conn.execute("DELETE FROM achievements WHERE id = ?", [achievement_id])?;

    let total = ledger::total_xp(conn, student_id)?;
    let xp_reversed = achievement.xp_reward.min(total).max(0);
    if xp_reversed > 0 {
        let note = format!("revoked {}", achievement.rule_id);
        ledger::append(
            conn,
            student_id,
            -xp_reversed,
            XpReason::Achievement,
            Some(&note),
            now,
        )?;
    }
    tracing::info!(student_id, achievement_id, xp_reversed, "achievement revoked");
    Ok(Revocation {
        achievement,
        xp_reversed,
    })
}
