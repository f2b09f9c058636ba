use crate::error::{EngineError, EngineResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDefinition {
    pub level: i64,
    pub name: String,
    pub xp_required: i64,
    #[serde(default)]
    pub benefits: String,
}

impl LevelDefinition {
    pub fn new(level: i64, name: &str, xp_required: i64, benefits: &str) -> Self {
        Self {
            level,
            name: name.to_string(),
            xp_required,
            benefits: benefits.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLevel {
    pub level: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextLevel {
    pub level: i64,
    pub name: String,
    pub xp_required: i64,
    pub xp_remaining: i64,
}

pub fn default_levels() -> Vec<LevelDefinition> {
    vec![
        LevelDefinition::new(1, "Novice", 0, "Starter profile"),
        LevelDefinition::new(2, "Apprentice", 100, "Custom avatar frame"),
        LevelDefinition::new(3, "Scholar", 300, "Class leaderboard highlight"),
        LevelDefinition::new(4, "Expert", 600, "Choose a seat once per term"),
        LevelDefinition::new(5, "Master", 1000, "Certificate of excellence"),
    ]
}

/// Validated level table: ordered by `level` and `xp_required` at the same
/// time, starting at level 1 with 0 XP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    levels: Vec<LevelDefinition>,
}

impl LevelTable {
    pub fn new(mut levels: Vec<LevelDefinition>) -> EngineResult<Self> {
        if levels.is_empty() {
            return Err(EngineError::Configuration(
                "level table is empty".to_string(),
            ));
        }
        levels.sort_by_key(|l| l.level);
        let first = &levels[0];
        if first.level != 1 || first.xp_required != 0 {
            return Err(EngineError::Configuration(
                "level table must start at level 1 with 0 xpRequired".to_string(),
            ));
        }
        for pair in levels.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.level <= prev.level {
                return Err(EngineError::Configuration(format!(
                    "duplicate level {}",
                    next.level
                )));
            }
            if next.xp_required <= prev.xp_required {
                return Err(EngineError::Configuration(format!(
                    "xpRequired must increase with level (level {} has {}, level {} has {})",
                    prev.level, prev.xp_required, next.level, next.xp_required
                )));
            }
        }
        if let Some(blank) = levels.iter().find(|l| l.name.trim().is_empty()) {
            return Err(EngineError::Configuration(format!(
                "level {} has an empty name",
                blank.level
            )));
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[LevelDefinition] {
        &self.levels
    }

    fn position_for(&self, total_xp: i64) -> usize {
        // Level 1 requires 0 XP, so the partition point is at least 1.
        let idx = self.levels.partition_point(|l| l.xp_required <= total_xp);
        idx.saturating_sub(1)
    }

    pub fn resolve(&self, total_xp: i64) -> ResolvedLevel {
        let def = &self.levels[self.position_for(total_xp.max(0))];
        ResolvedLevel {
            level: def.level,
            name: def.name.clone(),
        }
    }

    /// `None` once the student sits on the highest level.
    pub fn next_level(&self, total_xp: i64) -> Option<NextLevel> {
        let total = total_xp.max(0);
        let next = self.levels.get(self.position_for(total) + 1)?;
        Some(NextLevel {
            level: next.level,
            name: next.name.clone(),
            xp_required: next.xp_required,
            xp_remaining: next.xp_required - total,
        })
    }
}

pub fn load_table(conn: &Connection) -> EngineResult<LevelTable> {
    let mut stmt = conn.prepare(
        "SELECT level, name, xp_required, benefits FROM levels ORDER BY level",
    )?;
    let levels = stmt
        .query_map([], |r| {
            Ok(LevelDefinition {
                level: r.get(0)?,
                name: r.get(1)?,
                xp_required: r.get(2)?,
                benefits: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    LevelTable::new(levels)
}

/// Delete-all-then-reinsert, then re-resolve every cached level against the
/// new table in the same transaction.
pub fn replace_table(conn: &mut Connection, table: &LevelTable) -> EngineResult<usize> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    tx.execute("DELETE FROM levels", [])?;
    for def in table.levels() {
        tx.execute(
            "INSERT INTO levels(level, name, xp_required, benefits) VALUES(?, ?, ?, ?)",
            (def.level, &def.name, def.xp_required, &def.benefits),
        )?;
    }

    let cached = {
        let mut stmt = tx.prepare("SELECT student_id, total_xp FROM student_progress")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for (student_id, total_xp) in &cached {
        let resolved = table.resolve(*total_xp);
        tx.execute(
            "UPDATE student_progress SET level = ?, level_name = ? WHERE student_id = ?",
            (resolved.level, &resolved.name, student_id),
        )?;
    }
    tx.commit()?;
    Ok(cached.len())
}
