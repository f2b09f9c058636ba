use crate::ipc::helpers::{parse_field, with_engine, HandlerErr};
use crate::ipc::types::{AppState, Request};
use progressd::levels::LevelDefinition;
use progressd::Engine;
use serde_json::json;

fn levels_get(engine: &Engine, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let table = engine.level_table()?;
    Ok(json!({ "levels": table.levels() }))
}

fn levels_replace(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let defs: Vec<LevelDefinition> = parse_field(params, "levels")?;
    let table = engine.replace_levels(defs)?;
    Ok(json!({ "levels": table.levels() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "levels.get" => Some(with_engine(state, req, levels_get)),
        "levels.replace" => Some(with_engine(state, req, levels_replace)),
        _ => None,
    }
}
