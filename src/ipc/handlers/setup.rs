use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Pacing,
    Extraction,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "pacing" => Some(Self::Pacing),
            "extraction" => Some(Self::Extraction),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Pacing => "setup.pacing",
            Self::Extraction => "setup.extraction",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Pacing => json!({
            "defaultTotalDays": 160,
            "defaultMajorWorkFocusPercent": 70,
            "defaultTargetPopulation": "standard",
            "includePrerequisitesByDefault": false
        }),
        SetupSection::Extraction => json!({
            "defaultSessionCount": 1,
            "daysPerSession": 1
        }),
    }
}

fn merged_section(conn: &rusqlite::Connection, section: SetupSection) -> Value {
    let mut merged = default_section(section)
        .as_object()
        .cloned()
        .unwrap_or_default();
    if let Ok(Some(stored)) = db::settings_get_json(conn, section.key()) {
        if let Some(obj) = stored.as_object() {
            for (k, v) in obj {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_name = match required_str(req, "section") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(section) = SetupSection::parse(&section_name) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown setup section: {}", section_name),
            None,
        );
    };
    ok(&req.id, json!({ "settings": merged_section(conn, section) }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_name = match required_str(req, "section") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(section) = SetupSection::parse(&section_name) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown setup section: {}", section_name),
            None,
        );
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    // Only keys the section defines are accepted; the rest are rejected
    // rather than silently stored.
    let defaults = default_section(section);
    let known = defaults.as_object().cloned().unwrap_or_default();
    for key in patch.keys() {
        if !known.contains_key(key) {
            return err(
                &req.id,
                "bad_params",
                format!("unknown setting: {}", key),
                None,
            );
        }
    }

    let mut stored: Map<String, Value> = db::settings_get_json(conn, section.key())
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    for (k, v) in patch {
        if v.is_null() {
            stored.remove(k);
        } else {
            stored.insert(k.clone(), v.clone());
        }
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &Value::Object(stored)) {
        return err(&req.id, "db_query_failed", format!("{e:?}"), None);
    }
    ok(&req.id, json!({ "settings": merged_section(conn, section) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_get(state, req)),
        "setup.update" => Some(handle_update(state, req)),
        _ => None,
    }
}
