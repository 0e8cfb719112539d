use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::vision::{TextSummaryAnalyzer, VisionCache};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

fn cache<'a>(state: &'a AppState, req: &Request) -> Result<&'a VisionCache, serde_json::Value> {
    state
        .vision
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn load_analyzer(
    conn: &Connection,
    document_id: &str,
    lesson_number: i64,
) -> Result<Option<TextSummaryAnalyzer>, rusqlite::Error> {
    // Duplicate lesson numbers are possible; the earliest range wins here.
    let lesson = conn
        .query_row(
            "SELECT title, start_page, end_page FROM lessons
             WHERE document_id = ? AND lesson_number = ?
             ORDER BY start_page LIMIT 1",
            params![document_id, lesson_number],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((title, start_page, end_page)) = lesson else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT text_preview FROM pages
         WHERE document_id = ? AND page_number BETWEEN ? AND ?
         ORDER BY page_number",
    )?;
    let page_texts = stmt
        .query_map(params![document_id, start_page, end_page], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(TextSummaryAnalyzer {
        lesson_title: title,
        page_texts,
    }))
}

fn handle_analyze(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let vision = match cache(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let document_id = match required_str(req, "documentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_number = match required_i64(req, "lessonNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let analyzer = match load_analyzer(conn, &document_id, lesson_number) {
        Ok(Some(a)) => a,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "lesson not found; run lessons.extract first",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match vision.get_or_compute(&document_id, lesson_number, &analyzer) {
        Ok((analysis, layer)) => ok(
            &req.id,
            json!({ "analysis": analysis, "cached": layer.as_str() }),
        ),
        Err(e) => err(&req.id, "analysis_failed", format!("{e:?}"), None),
    }
}

fn handle_invalidate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let vision = match cache(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let document_id = match required_str(req, "documentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_number = match required_i64(req, "lessonNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match vision.invalidate(&document_id, lesson_number) {
        Ok(removed) => ok(&req.id, json!({ "removed": removed })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:?}"), None),
    }
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let vision = match cache(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match vision.clear() {
        Ok(removed) => ok(&req.id, json!({ "removedEntries": removed })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:?}"), None),
    }
}

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let vision = match cache(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match vision.stats() {
        Ok(stats) => ok(
            &req.id,
            json!({
                "memoryEntries": stats.memory_entries,
                "persistedEntries": stats.persisted_entries,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "vision.analyze" => Some(handle_analyze(state, req)),
        "vision.invalidate" => Some(handle_invalidate(state, req)),
        "vision.clear" => Some(handle_clear(state, req)),
        "vision.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
