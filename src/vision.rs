use anyhow::{anyhow, Context};
use regex::Regex;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seam for the expensive per-lesson analysis call. Production wires a
/// text-derived analyzer; tests inject counting fakes.
pub trait VisionAnalyzer {
    fn analyze(&self, document_id: &str, lesson_number: i64) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheLayer {
    Memory,
    Database,
    Computed,
}

impl CacheLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheLayer::Memory => "memory",
            CacheLayer::Database => "database",
            CacheLayer::Computed => "computed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub memory_entries: i64,
    pub persisted_entries: i64,
}

pub fn cache_key(document_id: &str, lesson_number: i64) -> String {
    format!("lesson_vision_analysis_{}_{}", document_id, lesson_number)
}

/// Two-layer read-through cache for analysis results: process-lifetime
/// memory map over a persisted `vision_cache` table. Neither layer
/// expires; invalidation is explicit. A per-key lock table keeps at most
/// one computation in flight per key across threads; late arrivals block,
/// then re-check both layers before computing.
pub struct VisionCache {
    conn: Mutex<Connection>,
    memory: Mutex<HashMap<String, Value>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VisionCache {
    /// Opens its own connection to the workspace database. The cache
    /// table lives in the same file as everything else; a separate
    /// connection is needed because the cache is shared across threads.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open cache db {}", db_path.to_string_lossy()))?;
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
        Ok(Self {
            conn: Mutex::new(conn),
            memory: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_or_compute(
        &self,
        document_id: &str,
        lesson_number: i64,
        analyzer: &dyn VisionAnalyzer,
    ) -> anyhow::Result<(Value, CacheLayer)> {
        let key = cache_key(document_id, lesson_number);

        if let Some(hit) = self.memory_get(&key)? {
            return Ok((hit, CacheLayer::Memory));
        }

        let key_lock = self.key_lock(&key)?;
        let _guard = key_lock
            .lock()
            .map_err(|_| anyhow!("cache key lock poisoned"))?;

        // Someone may have finished the same computation while we waited.
        if let Some(hit) = self.memory_get(&key)? {
            self.release_key(&key, &key_lock)?;
            return Ok((hit, CacheLayer::Memory));
        }
        if let Some(hit) = self.persisted_get(&key)? {
            self.memory_put(&key, hit.clone())?;
            self.release_key(&key, &key_lock)?;
            return Ok((hit, CacheLayer::Database));
        }

        let result = analyzer.analyze(document_id, lesson_number);
        let value = match result {
            Ok(v) => v,
            Err(e) => {
                self.release_key(&key, &key_lock)?;
                return Err(e);
            }
        };
        self.persisted_put(&key, document_id, lesson_number, &value)?;
        self.memory_put(&key, value.clone())?;
        self.release_key(&key, &key_lock)?;
        Ok((value, CacheLayer::Computed))
    }

    /// Drops one entry from both layers. Returns whether a persisted row
    /// existed.
    pub fn invalidate(&self, document_id: &str, lesson_number: i64) -> anyhow::Result<bool> {
        let key = cache_key(document_id, lesson_number);
        self.lock_memory()?.remove(&key);
        let removed = self
            .lock_conn()?
            .execute("DELETE FROM vision_cache WHERE cache_key = ?", [&key])?;
        Ok(removed > 0)
    }

    /// Full drop of both layers. Returns the persisted rows removed.
    pub fn clear(&self) -> anyhow::Result<i64> {
        self.lock_memory()?.clear();
        let removed = self.lock_conn()?.execute("DELETE FROM vision_cache", [])?;
        Ok(removed as i64)
    }

    pub fn stats(&self) -> anyhow::Result<CacheStats> {
        let memory_entries = self.lock_memory()?.len() as i64;
        let persisted_entries: i64 =
            self.lock_conn()?
                .query_row("SELECT COUNT(*) FROM vision_cache", [], |r| r.get(0))?;
        Ok(CacheStats {
            memory_entries,
            persisted_entries,
        })
    }

    fn lock_conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("cache db lock poisoned"))
    }

    fn lock_memory(&self) -> anyhow::Result<MutexGuard<'_, HashMap<String, Value>>> {
        self.memory
            .lock()
            .map_err(|_| anyhow!("cache memory lock poisoned"))
    }

    fn memory_get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.lock_memory()?.get(key).cloned())
    }

    fn memory_put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.lock_memory()?.insert(key.to_string(), value);
        Ok(())
    }

    fn persisted_get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT analysis_json FROM vision_cache WHERE cache_key = ?",
                [key],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match raw {
            Some(text) => Ok(Some(
                serde_json::from_str(&text).context("corrupt cached analysis json")?,
            )),
            None => Ok(None),
        }
    }

    fn persisted_put(
        &self,
        key: &str,
        document_id: &str,
        lesson_number: i64,
        value: &Value,
    ) -> anyhow::Result<()> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        self.lock_conn()?.execute(
            "INSERT OR REPLACE INTO vision_cache
             (cache_key, document_id, lesson_number, analysis_json, created_at)
             VALUES (?, ?, ?, ?, ?)",
            rusqlite::params![
                key,
                document_id,
                lesson_number,
                serde_json::to_string(value)?,
                created_at
            ],
        )?;
        Ok(())
    }

    fn key_lock(&self, key: &str) -> anyhow::Result<Arc<Mutex<()>>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| anyhow!("cache in-flight lock poisoned"))?;
        Ok(in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn release_key(&self, key: &str, lock: &Arc<Mutex<()>>) -> anyhow::Result<()> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| anyhow!("cache in-flight lock poisoned"))?;
        // Two strong refs means nobody else is waiting: the table's and ours.
        if Arc::strong_count(lock) == 2 {
            in_flight.remove(key);
        }
        Ok(())
    }
}

/// Stand-in for the external vision API: summarizes a lesson from its
/// stored page text. Built per request by the IPC layer from the lesson's
/// page range.
pub struct TextSummaryAnalyzer {
    pub lesson_title: String,
    pub page_texts: Vec<String>,
}

impl VisionAnalyzer for TextSummaryAnalyzer {
    fn analyze(&self, document_id: &str, lesson_number: i64) -> anyhow::Result<Value> {
        let session = Regex::new(r"(?i)SESSION\s+(\d+)").context("session pattern")?;
        let standard =
            Regex::new(r"\b\d+\.(?:RP|NS|EE|G|SP|F)\.(?:[A-C]\.)?\d+\b").context("standard pattern")?;
        let try_it = Regex::new(r"(?i)\bTry It\b").context("try-it pattern")?;

        let mut max_session: i64 = 0;
        let mut standards: Vec<String> = Vec::new();
        let mut try_it_count: i64 = 0;
        let mut word_count: i64 = 0;
        let mut has_family_letter = false;

        for text in &self.page_texts {
            for caps in session.captures_iter(text) {
                if let Ok(n) = caps[1].parse::<i64>() {
                    max_session = max_session.max(n);
                }
            }
            for m in standard.find_iter(text) {
                let code = m.as_str().to_string();
                if !standards.contains(&code) {
                    standards.push(code);
                }
            }
            try_it_count += try_it.find_iter(text).count() as i64;
            word_count += text.split_whitespace().count() as i64;
            if text.contains("Dear Family") {
                has_family_letter = true;
            }
        }

        Ok(json!({
            "documentId": document_id,
            "lessonNumber": lesson_number,
            "title": self.lesson_title,
            "pageCount": self.page_texts.len(),
            "sessionsDetected": max_session.max(1),
            "standards": standards,
            "tryItActivities": try_it_count,
            "wordCount": word_count,
            "hasFamilyLetter": has_family_letter,
        }))
    }
}
