use crate::ipc::helpers::{get_optional_str, get_required_str, parse_field, with_engine, HandlerErr};
use crate::ipc::types::{AppState, Request};
use progressd::{Engine, ProgressEvent};
use serde_json::json;

fn progress_apply_event(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let event: ProgressEvent = parse_field(params, "event")?;
    let delivery_key = get_optional_str(params, "deliveryKey")?;
    let outcome = engine.apply_event(&student_id, &event, delivery_key.as_deref())?;
    Ok(serde_json::to_value(outcome)?)
}

fn progress_get(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!({ "progress": engine.get_progress(&student_id)? }))
}

fn progress_adjust_xp(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let delta = params
        .get("delta")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("delta must be an integer"))?;
    let note = get_required_str(params, "note")?;
    let outcome = engine.adjust_xp(&student_id, delta, &note)?;
    Ok(serde_json::to_value(outcome)?)
}

fn progress_ledger(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!({ "entries": engine.list_ledger(&student_id)? }))
}

fn progress_reconcile(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    match get_optional_str(params, "studentId")? {
        Some(student_id) => Ok(json!({ "reports": [engine.reconcile(&student_id)?] })),
        None => Ok(json!({ "reports": engine.reconcile_all()? })),
    }
}

fn progress_digest(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!({ "digest": engine.ledger_digest(&student_id)? }))
}

fn progress_evaluate(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!({ "awarded": engine.evaluate_rules(&student_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.applyEvent" => Some(with_engine(state, req, progress_apply_event)),
        "progress.get" => Some(with_engine(state, req, progress_get)),
        "progress.adjustXp" => Some(with_engine(state, req, progress_adjust_xp)),
        "progress.ledger" => Some(with_engine(state, req, progress_ledger)),
        "progress.reconcile" => Some(with_engine(state, req, progress_reconcile)),
        "progress.digest" => Some(with_engine(state, req, progress_digest)),
        "progress.evaluate" => Some(with_engine(state, req, progress_evaluate)),
        _ => None,
    }
}
