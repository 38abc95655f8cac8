// prompt-toggle/src/webui.rs

//! Settings form for hosts with a web dashboard. The min/max values in the
//! schema are widget hints; submissions are checked by `Config::validate`.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    config::{Config, ConfigManager, ConfigPatch},
    registry::StateRegistry,
};

/// Textarea fields holding one entry per line.
const LIST_FIELDS: [&str; 2] = ["trigger_keywords", "authorized_users"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormResult {
    pub success: bool,
    pub message: String,
}

impl FormResult {
    fn ok(message: impl Into<String>) -> Self { Self { success: true, message: message.into() } }
    fn err(message: impl Into<String>) -> Self { Self { success: false, message: message.into() } }
}

pub fn form_schema(cfg: &Config, registry: &StateRegistry) -> Value {
    json!({
        "name": "prompt-toggle",
        "description": "Switch a timed role-play instruction on for a chat session.",
        "version": env!("CARGO_PKG_VERSION"),
        "status": if cfg.enabled { "running" } else { "disabled" },
        "config": {
            "type": "form",
            "form": {
                "enabled": {
                    "type": "switch", "label": "Enable plugin", "value": cfg.enabled,
                    "description": "Allow keywords to activate the state."
                },
                "admin_only_mode": {
                    "type": "switch", "label": "Admins only", "value": cfg.admin_only_mode,
                    "description": "Only admins can trigger; the user list is ignored."
                },
                "trigger_keywords": {
                    "type": "textarea", "label": "Trigger keywords", "value": cfg.trigger_keywords.join("\n"),
                    "description": "One per line. Matched case-insensitively anywhere in a message that mentions the bot.",
                    "placeholder": "remote control\ntd"
                },
                "interactive_item_name": {
                    "type": "input", "label": "Item name", "value": cfg.item_name,
                    "description": "Name substituted into the instruction.",
                    "placeholder": "special device"
                },
                "state_duration_seconds": {
                    "type": "number", "label": "Duration (s)", "value": cfg.state_duration_seconds,
                    "description": "How long an activation lasts.", "min": 30, "max": 600
                },
                "cooldown_seconds": {
                    "type": "number", "label": "Cooldown (s)", "value": cfg.cooldown_seconds,
                    "description": "Wait before the same session can trigger again.", "min": 10, "max": 300
                },
                "sensitivity_level": {
                    "type": "slider", "label": "Sensitivity", "value": cfg.sensitivity_level,
                    "description": "Higher means stronger reactions.", "min": 0, "max": 100, "step": 5
                },
                "max_concurrent_states": {
                    "type": "number", "label": "Max concurrent states", "value": cfg.max_concurrent_states,
                    "description": "Sessions that can be active at once.", "min": 1, "max": 50
                },
                "authorized_users": {
                    "type": "textarea", "label": "Authorized users", "value": cfg.authorized_users.join("\n"),
                    "description": "One user id per line. Empty lets everyone trigger.",
                    "placeholder": "123456789\n987654321"
                }
            }
        },
        "stats": {
            "active_states": registry.len(),
            "max_concurrent_states": cfg.max_concurrent_states
        }
    })
}

fn split_lines(text: &str) -> Value {
    Value::Array(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(|l| Value::String(l.into())).collect())
}

/// Turn a submitted form into a patch. Unknown keys are ignored.
pub fn form_to_patch(mut form: Map<String, Value>) -> Result<ConfigPatch, serde_json::Error> {
    for field in LIST_FIELDS {
        if let Some(Value::String(text)) = form.get(field) {
            let list = split_lines(text);
            form.insert(field.to_string(), list);
        }
    }
    serde_json::from_value(Value::Object(form))
}

pub fn apply_form(manager: &ConfigManager, submitted: Value) -> FormResult {
    let Value::Object(form) = submitted else { return FormResult::err("form data must be an object"); };
    let patch = match form_to_patch(form) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "form submission has wrong field types");
            return FormResult::err(format!("config update failed: {e}"));
        }
    };
    match manager.update(&patch) {
        Ok(true) => { info!("config updated from the web form"); FormResult::ok("config saved") }
        Ok(false) => FormResult::ok("nothing changed"),
        Err(e) => {
            warn!(error = %e, "form submission rejected");
            FormResult::err(format!("config update failed: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> ConfigManager { ConfigManager::in_memory(Config::default()).unwrap() }

    #[test]
    fn schema_reflects_config_and_stats() {
        let cfg = Config { trigger_keywords: vec!["a".into(), "b".into()], ..Config::default() };
        let reg = StateRegistry::new(10);
        reg.activate(&"qq_g1".into(), 60, 0).unwrap();
        let v = form_schema(&cfg, &reg);
        assert_eq!(v["config"]["form"]["trigger_keywords"]["value"], "a\nb");
        assert_eq!(v["config"]["form"]["sensitivity_level"]["step"], 5);
        assert_eq!(v["config"]["form"]["max_concurrent_states"]["min"], 1);
        assert_eq!(v["stats"]["active_states"], 1);
    }

    #[test]
    fn textareas_become_lists() {
        let m = mgr();
        let res = apply_form(&m, json!({
            "trigger_keywords": "  go \n\nstart\n",
            "authorized_users": "",
            "sensitivity_level": 75
        }));
        assert_eq!(res, FormResult::ok("config saved"));
        let cfg = m.get();
        assert_eq!(cfg.trigger_keywords, vec!["go".to_string(), "start".to_string()]);
        assert!(cfg.authorized_users.is_empty());
        assert_eq!(cfg.sensitivity_level, 75);
    }

    #[test]
    fn invalid_submission_changes_nothing() {
        let m = mgr();
        assert!(!apply_form(&m, json!({ "trigger_keywords": "\n \n" })).success);
        assert!(!apply_form(&m, json!({ "sensitivity_level": 101 })).success);
        assert!(!apply_form(&m, json!({ "enabled": "yes" })).success);
        assert!(!apply_form(&m, json!([1, 2])).success);
        assert_eq!(*m.get(), Config::default());
    }

    #[test]
    fn resubmitting_same_values_is_a_noop() {
        let m = mgr();
        let res = apply_form(&m, json!({ "enabled": true }));
        assert_eq!(res, FormResult::ok("nothing changed"));
    }
}
