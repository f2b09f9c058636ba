use crate::ipc::helpers::{get_required_str, parse_field, with_engine, HandlerErr};
use crate::ipc::types::{AppState, Request};
use progressd::badges::{BadgePatch, NewBadge};
use progressd::Engine;
use serde_json::json;

fn badges_list(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    Ok(json!({ "badges": engine.list_badges(include_inactive)? }))
}

fn badges_create(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let badge: NewBadge = serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid badge: {}", e)))?;
    let created = engine.create_badge(&badge)?;
    Ok(json!({ "badgeId": created.id, "badge": created }))
}

fn badges_update(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let badge_id = get_required_str(params, "badgeId")?;
    let patch: BadgePatch = parse_field(params, "patch")?;
    Ok(json!({ "badge": engine.update_badge(&badge_id, &patch)? }))
}

fn badges_delete(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let badge_id = get_required_str(params, "badgeId")?;
    engine.delete_badge(&badge_id)?;
    Ok(json!({ "ok": true }))
}

fn badges_grant(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let badge_id = get_required_str(params, "badgeId")?;
    let granted_by = get_required_str(params, "grantedBy")?;
    let grant = engine.grant_badge(&student_id, &badge_id, &granted_by)?;
    Ok(serde_json::to_value(grant)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "badges.list" => Some(with_engine(state, req, badges_list)),
        "badges.create" => Some(with_engine(state, req, badges_create)),
        "badges.update" => Some(with_engine(state, req, badges_update)),
        "badges.delete" => Some(with_engine(state, req, badges_delete)),
        "badges.grant" => Some(with_engine(state, req, badges_grant)),
        _ => None,
    }
}
