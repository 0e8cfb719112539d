use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_opt_string, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn document_exists(conn: &Connection, document_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM documents WHERE id = ? LIMIT 1",
        [document_id],
        |_r| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
}

fn document_row_json(row: &rusqlite::Row<'_>) -> Result<serde_json::Value, rusqlite::Error> {
    Ok(json!({
        "documentId": row.get::<_, String>(0)?,
        "filename": row.get::<_, String>(1)?,
        "title": row.get::<_, String>(2)?,
        "grade": row.get::<_, i64>(3)?,
        "volume": row.get::<_, i64>(4)?,
        "totalPages": row.get::<_, i64>(5)?,
    }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let volume = match required_i64(req, "volume") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total_pages = match required_i64(req, "totalPages") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if grade <= 0 || volume <= 0 {
        return err(&req.id, "bad_params", "grade and volume must be positive", None);
    }
    if total_pages <= 0 {
        return err(&req.id, "bad_params", "totalPages must be positive", None);
    }
    let title = match parse_opt_string(req.params.get("title")) {
        Ok(v) => v.unwrap_or_else(|| format!("Grade {} Volume {}", grade, volume)),
        Err(m) => return err(&req.id, "bad_params", format!("title {}", m), None),
    };
    let filename = match parse_opt_string(req.params.get("filename")) {
        Ok(v) => v.unwrap_or_else(|| format!("grade{}-volume{}.pdf", grade, volume)),
        Err(m) => return err(&req.id, "bad_params", format!("filename {}", m), None),
    };

    let document_id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO documents(id, filename, title, grade, volume, total_pages, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![document_id, filename, title, grade, volume, total_pages, now_ts()],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "documentId": document_id })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, filename, title, grade, volume, total_pages
         FROM documents ORDER BY grade, volume",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map([], |row| document_row_json(row));
    let docs = match rows.and_then(|r| r.collect::<Result<Vec<_>, _>>()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "documents": docs }))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let document_id = match required_str(req, "documentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let doc = conn
        .query_row(
            "SELECT id, filename, title, grade, volume, total_pages
             FROM documents WHERE id = ?",
            [&document_id],
            |row| document_row_json(row),
        )
        .optional();
    let doc = match doc {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "document not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let page_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM pages WHERE document_id = ?",
        [&document_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lesson_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM lessons WHERE document_id = ?",
        [&document_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut result = doc;
    result["importedPages"] = json!(page_count);
    result["lessonCount"] = json!(lesson_count);
    ok(&req.id, json!({ "document": result }))
}

fn handle_import_pages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let document_id = match required_str(req, "documentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match document_exists(conn, &document_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "document not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let Some(pages) = req.params.get("pages").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing pages array", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let mut imported = 0usize;
    for (idx, page) in pages.iter().enumerate() {
        let page_number = page.get("pageNumber").and_then(|v| v.as_i64());
        let Some(page_number) = page_number.filter(|n| *n > 0) else {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                format!("pages[{}].pageNumber must be a positive integer", idx),
                None,
            );
        };
        let text_preview = page
            .get("textPreview")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let indicators = page
            .get("lessonIndicators")
            .cloned()
            .unwrap_or_else(|| json!([]));
        if !indicators.is_array() {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                format!("pages[{}].lessonIndicators must be an array", idx),
                None,
            );
        }
        let res = tx.execute(
            "INSERT OR REPLACE INTO pages(document_id, page_number, text_preview, lesson_indicators)
             VALUES (?, ?, ?, ?)",
            params![
                document_id,
                page_number,
                text_preview,
                indicators.to_string()
            ],
        );
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
        imported += 1;
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "importedPages": imported }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let document_id = match required_str(req, "documentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match document_exists(conn, &document_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "document not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // Children first; cached analyses for the document go with it.
    let steps = [
        "DELETE FROM vision_cache WHERE document_id = ?",
        "DELETE FROM lessons WHERE document_id = ?",
        "DELETE FROM pages WHERE document_id = ?",
        "DELETE FROM documents WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&document_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "documents.create" => Some(handle_create(state, req)),
        "documents.list" => Some(handle_list(state, req)),
        "documents.open" => Some(handle_open(state, req)),
        "documents.importPages" => Some(handle_import_pages(state, req)),
        "documents.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
