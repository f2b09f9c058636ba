use crate::ipc::helpers::{get_required_str, with_engine, HandlerErr};
use crate::ipc::types::{AppState, Request};
use progressd::Engine;
use serde_json::json;

fn achievements_list(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!({ "achievements": engine.list_achievements(&student_id)? }))
}

fn achievements_revoke(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let achievement_id = get_required_str(params, "achievementId")?;
    let revocation = engine.revoke_achievement(&student_id, &achievement_id)?;
    Ok(serde_json::to_value(revocation)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "achievements.list" => Some(with_engine(state, req, achievements_list)),
        "achievements.revoke" => Some(with_engine(state, req, achievements_revoke)),
        _ => None,
    }
}
