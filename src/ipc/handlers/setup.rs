use crate::ipc::helpers::{with_engine, HandlerErr};
use crate::ipc::types::{AppState, Request};
use progressd::config::EngineConfig;
use progressd::Engine;
use serde_json::json;

fn config_get(engine: &Engine, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "config": engine.config()? }))
}

/// Accepts either a full config or a partial object merged over the
/// current one, e.g. `{ "attendance": { "presentXp": 15 } }`.
fn config_update(engine: &Engine, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(patch) = params.get("config").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing config object"));
    };
    let mut merged = serde_json::to_value(engine.config()?)?;
    merge_json(&mut merged, patch);
    let cfg: EngineConfig = serde_json::from_value(merged)
        .map_err(|e| HandlerErr::bad_params(format!("invalid config: {}", e)))?;
    engine.update_config(&cfg)?;
    Ok(json!({ "config": cfg }))
}

/// Objects merge key by key; anything else (arrays included) replaces.
fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (k, v) in patch {
                match base.get_mut(k) {
                    Some(existing) => merge_json(existing, v),
                    None => {
                        base.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(with_engine(state, req, config_get)),
        "config.update" => Some(with_engine(state, req, config_update)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::merge_json;
    use serde_json::json;

    #[test]
    fn merge_keeps_untouched_sections() {
        let mut base = json!({
            "attendance": { "presentXp": 10, "lateXp": 5 },
            "rules": [{ "id": "a" }]
        });
        merge_json(
            &mut base,
            &json!({ "attendance": { "presentXp": 15 }, "rules": [] }),
        );
        assert_eq!(base["attendance"]["presentXp"], 15);
        assert_eq!(base["attendance"]["lateXp"], 5);
        assert_eq!(base["rules"], json!([]));
    }
}
