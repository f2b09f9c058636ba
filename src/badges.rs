use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub xp_reward: i64,
    pub is_active: bool,
    pub repeatable: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBadge {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub xp_reward: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub repeatable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub xp_reward: Option<i64>,
    pub is_active: Option<bool>,
    pub repeatable: Option<bool>,
}

const BADGE_COLUMNS: &str =
    "id, name, description, icon, xp_reward, is_active, repeatable, created_at, updated_at";

fn badge_from_row(r: &Row<'_>) -> rusqlite::Result<BadgeDefinition> {
    Ok(BadgeDefinition {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        icon: r.get(3)?,
        xp_reward: r.get(4)?,
        is_active: r.get::<_, i64>(5)? != 0,
        repeatable: r.get::<_, i64>(6)? != 0,
        created_at: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

fn check_fields(name: &str, xp_reward: i64) -> EngineResult<()> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidEvent("badge name must not be empty".to_string()));
    }
    if xp_reward < 0 {
        return Err(EngineError::InvalidEvent(
            "badge xpReward must not be negative".to_string(),
        ));
    }
    Ok(())
}

pub fn create(conn: &Connection, badge: &NewBadge, now: &str) -> EngineResult<BadgeDefinition> {
    check_fields(&badge.name, badge.xp_reward)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO badges(id, name, description, icon, xp_reward, is_active, repeatable, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            badge.name.trim(),
            &badge.description,
            &badge.icon,
            badge.xp_reward,
            badge.is_active as i64,
            badge.repeatable as i64,
            now,
        ),
    )?;
    tracing::info!(badge_id = %id, name = %badge.name, "badge created");
    get(conn, &id)
}

pub fn find(conn: &Connection, badge_id: &str) -> EngineResult<Option<BadgeDefinition>> {
    let sql = format!("SELECT {} FROM badges WHERE id = ?", BADGE_COLUMNS);
    Ok(conn.query_row(&sql, [badge_id], badge_from_row).optional()?)
}

pub fn get(conn: &Connection, badge_id: &str) -> EngineResult<BadgeDefinition> {
    find(conn, badge_id)?.ok_or_else(|| EngineError::not_found("badge", badge_id))
}

pub fn list(conn: &Connection, include_inactive: bool) -> EngineResult<Vec<BadgeDefinition>> {
    let sql = format!(
        "SELECT {} FROM badges {} ORDER BY name COLLATE NOCASE, id",
        BADGE_COLUMNS,
        if include_inactive { "" } else { "WHERE is_active = 1" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], badge_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update(
    conn: &Connection,
    badge_id: &str,
    patch: &BadgePatch,
    now: &str,
) -> EngineResult<BadgeDefinition> {
    let mut badge = get(conn, badge_id)?;
    if let Some(v) = &patch.name {
        badge.name = v.trim().to_string();
    }
    if let Some(v) = &patch.description {
        badge.description = v.clone();
    }
    if let Some(v) = &patch.icon {
        badge.icon = v.clone();
    }
    if let Some(v) = patch.xp_reward {
        badge.xp_reward = v;
    }
    if let Some(v) = patch.is_active {
        badge.is_active = v;
    }
    if let Some(v) = patch.repeatable {
        badge.repeatable = v;
    }
    check_fields(&badge.name, badge.xp_reward)?;
    conn.execute(
        "UPDATE badges
         SET name = ?, description = ?, icon = ?, xp_reward = ?, is_active = ?, repeatable = ?, updated_at = ?
         WHERE id = ?",
        (
            &badge.name,
            &badge.description,
            &badge.icon,
            badge.xp_reward,
            badge.is_active as i64,
            badge.repeatable as i64,
            now,
            badge_id,
        ),
    )?;
    tracing::info!(badge_id, active = badge.is_active, "badge updated");
    get(conn, badge_id)
}

pub fn usage_count(conn: &Connection, badge_id: &str) -> EngineResult<i64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM achievements WHERE badge_id = ?",
        [badge_id],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Refuses to orphan achievements: an awarded badge can only be deactivated.
pub fn delete(conn: &Connection, badge_id: &str) -> EngineResult<()> {
    get(conn, badge_id)?;
    let usage_count = usage_count(conn, badge_id)?;
    if usage_count > 0 {
        return Err(EngineError::BadgeInUse {
            badge_id: badge_id.to_string(),
            usage_count,
        });
    }
    conn.execute("DELETE FROM badges WHERE id = ?", [badge_id])?;
    tracing::info!(badge_id, "badge deleted");
    Ok(())
}
