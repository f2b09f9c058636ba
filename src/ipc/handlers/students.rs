use crate::ipc::helpers::{get_required_str, with_engine, HandlerErr};
use crate::ipc::types::{AppState, Request};
use progressd::Engine;
use serde_json::json;

fn students_register(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let display_name = params
        .get("displayName")
        .and_then(|v| v.as_str())
        .unwrap_or(student_id.as_str())
        .to_string();
    let active = match params.get("active") {
        None | Some(serde_json::Value::Null) => true,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("active must be boolean"))?,
    };
    let student = engine.register_student(&student_id, &display_name, active)?;
    Ok(json!({ "student": student }))
}

fn students_list(engine: &Engine, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "students": engine.list_students()? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.register" => Some(with_engine(state, req, students_register)),
        "students.list" => Some(with_engine(state, req, students_list)),
        _ => None,
    }
}
