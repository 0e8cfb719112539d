use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_i64_array, parse_opt_i64, parse_opt_string};
use crate::ipc::types::{AppState, Request};
use crate::pacing::{build_pacing_guide, PacingInput, PacingRequest};
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::json;

#[derive(Clone, Debug)]
struct PacingSetupDefaults {
    default_total_days: i64,
    default_major_work_focus_percent: i64,
    default_target_population: String,
    include_prerequisites_by_default: bool,
}

fn load_pacing_setup_defaults(conn: &Connection) -> PacingSetupDefaults {
    let obj = db::settings_get_json(conn, "setup.pacing")
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    let default_total_days = obj
        .get("defaultTotalDays")
        .and_then(|v| v.as_i64())
        .filter(|v| *v > 0)
        .unwrap_or(160);
    let default_major_work_focus_percent = obj
        .get("defaultMajorWorkFocusPercent")
        .and_then(|v| v.as_i64())
        .filter(|v| (0..=100).contains(v))
        .unwrap_or(70);
    let default_target_population = obj
        .get("defaultTargetPopulation")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "standard".to_string());
    let include_prerequisites_by_default = obj
        .get("includePrerequisitesByDefault")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    PacingSetupDefaults {
        default_total_days,
        default_major_work_focus_percent,
        default_target_population,
        include_prerequisites_by_default,
    }
}

fn load_pacing_inputs(conn: &Connection, grades: &[i64]) -> Result<Vec<PacingInput>, String> {
    if grades.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = grades.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT l.id, l.lesson_number, l.title, d.grade, d.volume,
                l.is_major_work, l.estimated_days
         FROM lessons l JOIN documents d ON d.id = l.document_id
         WHERE d.grade IN ({})
         ORDER BY d.grade, d.volume, l.lesson_number, l.start_page",
        placeholders
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let args = grades.iter().map(|g| Value::Integer(*g)).collect::<Vec<_>>();
    let rows = stmt
        .query_map(params_from_iter(args), |row| {
            Ok(PacingInput {
                lesson_id: row.get(0)?,
                lesson_number: row.get(1)?,
                title: row.get(2)?,
                grade: row.get(3)?,
                volume: row.get(4)?,
                is_major_work: row.get::<_, i64>(5)? != 0,
                estimated_days: row.get(6)?,
            })
        })
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
}

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let defaults = load_pacing_setup_defaults(conn);

    let grade_range = match parse_i64_array(req.params.get("gradeRange"), "gradeRange") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if grade_range.is_empty() {
        return err(&req.id, "bad_params", "gradeRange must not be empty", None);
    }
    let total_days = match parse_opt_i64(req.params.get("totalDays")) {
        Ok(v) => v.unwrap_or(defaults.default_total_days),
        Err(m) => return err(&req.id, "bad_params", format!("totalDays {}", m), None),
    };
    if total_days <= 0 {
        return err(&req.id, "bad_params", "totalDays must be positive", None);
    }
    let major_work_focus_percent = match parse_opt_i64(req.params.get("majorWorkFocusPercent")) {
        Ok(v) => v.unwrap_or(defaults.default_major_work_focus_percent),
        Err(m) => {
            return err(
                &req.id,
                "bad_params",
                format!("majorWorkFocusPercent {}", m),
                None,
            )
        }
    };
    if !(0..=100).contains(&major_work_focus_percent) {
        return err(
            &req.id,
            "bad_params",
            "majorWorkFocusPercent must be between 0 and 100",
            None,
        );
    }
    let target_population = match parse_opt_string(req.params.get("targetPopulation")) {
        Ok(v) => v
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or(defaults.default_target_population),
        Err(m) => {
            return err(
                &req.id,
                "bad_params",
                format!("targetPopulation {}", m),
                None,
            )
        }
    };
    let include_prerequisites = match parse_bool(
        req.params.get("includePrerequisites"),
        defaults.include_prerequisites_by_default,
    ) {
        Ok(v) => v,
        Err(m) => {
            return err(
                &req.id,
                "bad_params",
                format!("includePrerequisites {}", m),
                None,
            )
        }
    };

    let request = PacingRequest {
        grade_range: grade_range.clone(),
        total_days,
        major_work_focus_percent,
        target_population,
        include_prerequisites,
    };
    let inputs = match load_pacing_inputs(conn, &grade_range) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "db_query_failed", m, None),
    };
    // Unknown grades select nothing; that is an empty guide, not an error.
    let guide = build_pacing_guide(inputs, &request);
    match serde_json::to_value(&guide) {
        Ok(v) => ok(&req.id, json!({ "request": request, "guide": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "pacing.generate" => Some(handle_generate(state, req)),
        _ => None,
    }
}
