use crate::db;
use crate::extract::{extract_lesson_boundaries, PageRecord};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, parse_i64_array, parse_opt_i64, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use uuid::Uuid;

pub const PROVENANCE_EXTRACTED: &str = "extracted";
pub const PROVENANCE_CORRECTED: &str = "corrected";

fn days_per_session(conn: &Connection) -> i64 {
    db::settings_get_json(conn, "setup.extraction")
        .ok()
        .flatten()
        .and_then(|v| v.get("daysPerSession").and_then(|d| d.as_i64()))
        .filter(|v| *v > 0)
        .unwrap_or(1)
}

fn load_page_records(conn: &Connection, document_id: &str) -> Result<Vec<PageRecord>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT page_number, text_preview, lesson_indicators
             FROM pages WHERE document_id = ? ORDER BY page_number",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([document_id], |row| {
            let page_number: i64 = row.get(0)?;
            let text_preview: String = row.get(1)?;
            let indicators_raw: String = row.get(2)?;
            Ok((page_number, text_preview, indicators_raw))
        })
        .map_err(|e| e.to_string())?;

    let mut pages = Vec::new();
    for row in rows {
        let (page_number, text_preview, indicators_raw) = row.map_err(|e| e.to_string())?;
        let lesson_indicators: Vec<String> =
            serde_json::from_str(&indicators_raw).unwrap_or_default();
        pages.push(PageRecord {
            page_number,
            text_preview,
            lesson_indicators,
        });
    }
    Ok(pages)
}

fn lesson_row_json(row: &rusqlite::Row<'_>) -> Result<JsonValue, rusqlite::Error> {
    Ok(json!({
        "lessonId": row.get::<_, String>(0)?,
        "documentId": row.get::<_, String>(1)?,
        "lessonNumber": row.get::<_, i64>(2)?,
        "title": row.get::<_, String>(3)?,
        "startPage": row.get::<_, i64>(4)?,
        "endPage": row.get::<_, i64>(5)?,
        "sessionCount": row.get::<_, i64>(6)?,
        "isMajorWork": row.get::<_, i64>(7)? != 0,
        "estimatedDays": row.get::<_, i64>(8)?,
        "provenance": row.get::<_, String>(9)?,
        "grade": row.get::<_, i64>(10)?,
        "volume": row.get::<_, i64>(11)?,
    }))
}

const LESSON_SELECT: &str = "SELECT l.id, l.document_id, l.lesson_number, l.title, l.start_page,
        l.end_page, l.session_count, l.is_major_work, l.estimated_days, l.provenance,
        d.grade, d.volume
 FROM lessons l JOIN documents d ON d.id = l.document_id";

fn handle_extract(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let document_id = match required_str(req, "documentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total_pages: i64 = match conn
        .query_row(
            "SELECT total_pages FROM documents WHERE id = ?",
            [&document_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "document not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let pages = match load_page_records(conn, &document_id) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "db_query_failed", m, None),
    };
    let extraction = extract_lesson_boundaries(&pages, total_pages);

    // Hand-corrected rows are ground truth: re-extraction never touches
    // them, and extracted rows for the same lesson number are skipped.
    let corrected: HashSet<i64> = {
        let mut stmt = match conn.prepare(
            "SELECT lesson_number FROM lessons WHERE document_id = ? AND provenance = ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt.query_map(params![document_id, PROVENANCE_CORRECTED], |row| {
            row.get::<_, i64>(0)
        });
        match rows.and_then(|r| r.collect::<Result<HashSet<_>, _>>()) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let day_scale = days_per_session(conn);

    // Replace-and-insert is all or nothing: a bad row must not leave the
    // document with its old extraction deleted and only part of the new
    // one written.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM lessons WHERE document_id = ? AND provenance = ?",
        params![document_id, PROVENANCE_EXTRACTED],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    let mut inserted = 0usize;
    let mut preserved = 0usize;
    for lesson in &extraction.lessons {
        if corrected.contains(&lesson.lesson_number) {
            preserved += 1;
            continue;
        }
        let estimated_days = (lesson.session_count * day_scale).max(1);
        let res = tx.execute(
            "INSERT INTO lessons(id, document_id, lesson_number, title, start_page, end_page,
                                 session_count, is_major_work, estimated_days, provenance, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                document_id,
                lesson.lesson_number,
                lesson.title,
                lesson.start_page,
                lesson.end_page,
                lesson.session_count,
                lesson.is_major_work as i64,
                estimated_days,
                PROVENANCE_EXTRACTED,
                now_ts()
            ],
        );
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
        inserted += 1;
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let lessons = match list_lessons_for_document(conn, &document_id) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "db_query_failed", m, None),
    };
    ok(
        &req.id,
        json!({
            "extracted": inserted,
            "preservedCorrected": preserved,
            "warnings": extraction.warnings,
            "lessons": lessons,
        }),
    )
}

fn list_lessons_for_document(conn: &Connection, document_id: &str) -> Result<Vec<JsonValue>, String> {
    let sql = format!("{} WHERE l.document_id = ? ORDER BY l.start_page", LESSON_SELECT);
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([document_id], |row| lesson_row_json(row))
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
}

pub fn list_lessons_for_grades(conn: &Connection, grades: &[i64]) -> Result<Vec<JsonValue>, String> {
    if grades.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = grades.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "{} WHERE d.grade IN ({}) ORDER BY d.grade, d.volume, l.lesson_number, l.start_page",
        LESSON_SELECT, placeholders
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let args = grades.iter().map(|g| Value::Integer(*g)).collect::<Vec<_>>();
    let rows = stmt
        .query_map(params_from_iter(args), |row| lesson_row_json(row))
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Some(document_id) = req.params.get("documentId").and_then(|v| v.as_str()) {
        let lessons = match list_lessons_for_document(conn, document_id) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "db_query_failed", m, None),
        };
        return ok(&req.id, json!({ "lessons": lessons }));
    }
    let grades = match parse_i64_array(req.params.get("grades"), "grades") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let lessons = match list_lessons_for_grades(conn, &grades) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "db_query_failed", m, None),
    };
    ok(&req.id, json!({ "lessons": lessons }))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sql = format!("{} WHERE l.id = ?", LESSON_SELECT);
    let lesson = conn
        .query_row(&sql, [&lesson_id], |row| lesson_row_json(row))
        .optional();
    match lesson {
        Ok(Some(v)) => ok(&req.id, json!({ "lesson": v })),
        Ok(None) => err(&req.id, "not_found", "lesson not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_correct(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let existing = conn
        .query_row(
            "SELECT start_page, end_page FROM lessons WHERE id = ?",
            [&lesson_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional();
    let (cur_start, cur_end) = match existing {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "lesson not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let start_page = match parse_opt_i64(patch.get("startPage")) {
        Ok(v) => v.unwrap_or(cur_start),
        Err(m) => return err(&req.id, "bad_params", format!("startPage {}", m), None),
    };
    let end_page = match parse_opt_i64(patch.get("endPage")) {
        Ok(v) => v.unwrap_or(cur_end),
        Err(m) => return err(&req.id, "bad_params", format!("endPage {}", m), None),
    };
    if start_page <= 0 || end_page <= 0 {
        return err(&req.id, "bad_params", "page numbers must be positive", None);
    }
    if start_page > end_page {
        return err(&req.id, "bad_params", "startPage must not exceed endPage", None);
    }
    let title = match parse_opt_string(patch.get("title")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("title {}", m), None),
    };
    let session_count = match parse_opt_i64(patch.get("sessionCount")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("sessionCount {}", m), None),
    };
    if session_count.map(|v| v <= 0).unwrap_or(false) {
        return err(&req.id, "bad_params", "sessionCount must be positive", None);
    }
    let estimated_days = match parse_opt_i64(patch.get("estimatedDays")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("estimatedDays {}", m), None),
    };
    if estimated_days.map(|v| v <= 0).unwrap_or(false) {
        return err(&req.id, "bad_params", "estimatedDays must be positive", None);
    }
    let is_major_work = match patch.get("isMajorWork") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_bool() {
            Some(b) => Some(b),
            None => return err(&req.id, "bad_params", "isMajorWork must be boolean", None),
        },
    };

    let mut sets = vec![
        "start_page = ?".to_string(),
        "end_page = ?".to_string(),
        "provenance = ?".to_string(),
        "updated_at = ?".to_string(),
    ];
    let mut args: Vec<Value> = vec![
        Value::Integer(start_page),
        Value::Integer(end_page),
        Value::Text(PROVENANCE_CORRECTED.to_string()),
        Value::Text(now_ts()),
    ];
    if let Some(t) = title {
        sets.push("title = ?".to_string());
        args.push(Value::Text(t));
    }
    if let Some(s) = session_count {
        sets.push("session_count = ?".to_string());
        args.push(Value::Integer(s));
    }
    if let Some(d) = estimated_days {
        sets.push("estimated_days = ?".to_string());
        args.push(Value::Integer(d));
    }
    if let Some(m) = is_major_work {
        sets.push("is_major_work = ?".to_string());
        args.push(Value::Integer(m as i64));
    }
    args.push(Value::Text(lesson_id.clone()));

    let sql = format!("UPDATE lessons SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(args)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    let sql = format!("{} WHERE l.id = ?", LESSON_SELECT);
    match conn.query_row(&sql, [&lesson_id], |row| lesson_row_json(row)) {
        Ok(v) => ok(&req.id, json!({ "lesson": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let query = match required_str(req, "query") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grades = match req.params.get("grades") {
        None => Vec::new(),
        Some(v) if v.is_null() => Vec::new(),
        some => match parse_i64_array(some, "grades") {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", m, None),
        },
    };
    let include_corrected_only = match parse_bool(req.params.get("correctedOnly"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("correctedOnly {}", m), None),
    };

    let mut sql = format!("{} WHERE l.title LIKE ?", LESSON_SELECT);
    let mut args: Vec<Value> = vec![Value::Text(format!("%{}%", query))];
    if !grades.is_empty() {
        let placeholders = grades.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        sql.push_str(&format!(" AND d.grade IN ({})", placeholders));
        args.extend(grades.iter().map(|g| Value::Integer(*g)));
    }
    if include_corrected_only {
        sql.push_str(" AND l.provenance = ?");
        args.push(Value::Text(PROVENANCE_CORRECTED.to_string()));
    }
    sql.push_str(" ORDER BY d.grade, l.lesson_number");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map(params_from_iter(args), |row| lesson_row_json(row));
    match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(v) => ok(&req.id, json!({ "lessons": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.extract" => Some(handle_extract(state, req)),
        "lessons.list" => Some(handle_list(state, req)),
        "lessons.open" => Some(handle_open(state, req)),
        "lessons.correct" => Some(handle_correct(state, req)),
        "lessons.search" => Some(handle_search(state, req)),
        _ => None,
    }
}
