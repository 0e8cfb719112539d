use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILENAME: &str = "curriculum.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILENAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            title TEXT NOT NULL,
            grade INTEGER NOT NULL,
            volume INTEGER NOT NULL,
            total_pages INTEGER NOT NULL,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_grade ON documents(grade, volume)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pages(
            document_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            text_preview TEXT NOT NULL,
            lesson_indicators TEXT NOT NULL,
            PRIMARY KEY(document_id, page_number),
            FOREIGN KEY(document_id) REFERENCES documents(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            lesson_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            start_page INTEGER NOT NULL,
            end_page INTEGER NOT NULL,
            session_count INTEGER NOT NULL DEFAULT 1,
            is_major_work INTEGER NOT NULL DEFAULT 0,
            estimated_days INTEGER NOT NULL DEFAULT 1,
            provenance TEXT NOT NULL DEFAULT 'extracted',
            updated_at TEXT,
            FOREIGN KEY(document_id) REFERENCES documents(id),
            CHECK(start_page >= 1),
            CHECK(end_page >= start_page)
        )",
        [],
    )?;
    // Lesson numbers are not unique per document: duplicates exist in the
    // source corpus and are surfaced as extraction warnings instead.
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_document ON lessons(document_id, lesson_number)",
        [],
    )?;

    // The vision cache table shares this file but is accessed through its
    // own connection (see vision::VisionCache::open).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS vision_cache(
            cache_key TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            lesson_number INTEGER NOT NULL,
            analysis_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before provenance tracking carry lessons without
    // the column. Add it and treat existing rows as auto-extracted.
    ensure_lessons_provenance(&conn)?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_lessons_provenance(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lessons", "provenance")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lessons ADD COLUMN provenance TEXT NOT NULL DEFAULT 'extracted'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
