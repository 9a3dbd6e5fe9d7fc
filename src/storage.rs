//! SQLite storage layer for the persisted key-value state and practice history

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{LanguagePair, Scores, Topic, TurnRecord};

/// Storage backend using SQLite
pub struct Storage {
    conn: Mutex<Connection>,
}

// Ledger-owned keys. Only `GamificationLedger` writes these.
pub const KEY_XP_TOTAL: &str = "xp_total";
pub const KEY_STREAK_DAYS: &str = "streak_days";
pub const KEY_LAST_STREAK_DATE: &str = "last_streak_date";
pub const KEY_AI_MEMORY: &str = "ai_memory";

pub const SETTING_COACH_URL: &str = "coach_url";
pub const SETTING_SOURCE_LANG: &str = "source_lang";
pub const SETTING_TARGET_LANG: &str = "target_lang";
pub const SETTING_TOPIC: &str = "topic";

impl Storage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open the database in the platform data directory, creating it if needed
    pub fn open_default() -> Result<Self> {
        let path = default_db_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening database at {}", path.display());
        Self::open(path)
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS turn_history (
                id TEXT PRIMARY KEY,
                transcript TEXT NOT NULL,
                reply TEXT NOT NULL,
                correction TEXT,
                total_score INTEGER NOT NULL,
                grammar_score INTEGER NOT NULL,
                pronunciation_score INTEGER NOT NULL,
                xp_awarded INTEGER NOT NULL,
                source_lang TEXT NOT NULL,
                target_lang TEXT NOT NULL,
                topic TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turn_history_created ON turn_history(created_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========== Settings ==========

    /// Save or update a setting value
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.set_settings(&[(key, value)])
    }

    /// Write several settings atomically
    pub fn set_settings(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (key, value) in entries {
            tx.execute(
                r#"
                INSERT INTO settings (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![key, value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Get a setting value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Remove a setting; returns whether it existed
    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    // ========== Practice history ==========

    /// Append a completed turn
    pub fn save_turn(&self, record: &TurnRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO turn_history (id, transcript, reply, correction, total_score,
                                      grammar_score, pronunciation_score, xp_awarded,
                                      source_lang, target_lang, topic, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.id.to_string(),
                record.transcript,
                record.reply,
                record.correction,
                record.scores.total,
                record.scores.grammar,
                record.scores.pronunciation,
                record.xp_awarded,
                record.languages.source(),
                record.languages.target(),
                record.topic.label(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        debug!("Saved turn record {}", record.id);
        Ok(())
    }

    /// Most recent turns, newest first
    ///
    /// A row whose id or timestamp cannot be parsed fails the whole read.
    pub fn get_recent_turns(&self, limit: usize) -> Result<Vec<TurnRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, transcript, reply, correction, total_score, grammar_score,
                   pronunciation_score, xp_awarded, source_lang, target_lang, topic, created_at
            FROM turn_history
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            let id: String = row.get(0)?;
            let source: String = row.get(8)?;
            let target: String = row.get(9)?;
            let topic: String = row.get(10)?;
            let created_at: String = row.get(11)?;

            Ok(TurnRecord {
                id: Uuid::parse_str(&id).map_err(|e| conversion_failure(0, e))?,
                transcript: row.get(1)?,
                reply: row.get(2)?,
                correction: row.get(3)?,
                scores: Scores {
                    total: row.get(4)?,
                    grammar: row.get(5)?,
                    pronunciation: row.get(6)?,
                },
                xp_awarded: row.get(7)?,
                languages: LanguagePair::new(source, target),
                topic: Topic::parse(&topic),
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| conversion_failure(11, e))?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Number of completed turns
    pub fn get_turn_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM turn_history", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Highest total score ever received, if any turn was recorded
    pub fn get_best_score(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT MAX(total_score) FROM turn_history", [], |row| {
            row.get(0)
        })
        .map_err(Into::into)
    }
}

fn conversion_failure(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

/// Default database location: `<data_local_dir>/genau/genau.db`
pub fn default_db_path() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("genau").join("genau.db"))
        .ok_or_else(|| Error::Config("No local data directory on this platform".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoachingResponse, SessionTurn};

    #[test]
    fn test_settings_roundtrip() {
        let storage = Storage::in_memory().unwrap();

        storage
            .set_setting(SETTING_COACH_URL, "http://localhost:8000")
            .unwrap();

        let value = storage.get_setting(SETTING_COACH_URL).unwrap();
        assert_eq!(value, Some("http://localhost:8000".to_string()));

        assert!(storage.delete_setting(SETTING_COACH_URL).unwrap());
        assert!(!storage.delete_setting(SETTING_COACH_URL).unwrap());
        assert_eq!(storage.get_setting(SETTING_COACH_URL).unwrap(), None);
    }

    #[test]
    fn test_set_settings_overwrites() {
        let storage = Storage::in_memory().unwrap();

        storage
            .set_settings(&[(KEY_XP_TOTAL, "10"), (KEY_STREAK_DAYS, "1")])
            .unwrap();
        storage
            .set_settings(&[(KEY_XP_TOTAL, "15"), (KEY_STREAK_DAYS, "2")])
            .unwrap();

        assert_eq!(
            storage.get_setting(KEY_XP_TOTAL).unwrap(),
            Some("15".to_string())
        );
        assert_eq!(
            storage.get_setting(KEY_STREAK_DAYS).unwrap(),
            Some("2".to_string())
        );
    }

    #[test]
    fn test_turn_history() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(storage.get_turn_count().unwrap(), 0);
        assert_eq!(storage.get_best_score().unwrap(), None);

        let mut turn = SessionTurn::new(LanguagePair::default(), Topic::Shopping, "");
        turn.transcript = "Ich möchte Kaffee".to_string();
        let response = CoachingResponse {
            reply_text: "Gut gemacht!".to_string(),
            scores: Scores {
                total: 85,
                grammar: 90,
                pronunciation: 80,
            },
            xp_delta: 5,
            ..Default::default()
        };

        let record = TurnRecord::new(&turn, &response);
        storage.save_turn(&record).unwrap();

        let recent = storage.get_recent_turns(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, record.id);
        assert_eq!(recent[0].transcript, "Ich möchte Kaffee");
        assert_eq!(recent[0].reply, "Gut gemacht!");
        assert_eq!(recent[0].correction, None);
        assert_eq!(recent[0].scores.grammar, 90);
        assert_eq!(recent[0].topic, Topic::Shopping);
        assert_eq!(recent[0].languages, LanguagePair::default());

        assert_eq!(storage.get_turn_count().unwrap(), 1);
        assert_eq!(storage.get_best_score().unwrap(), Some(85));

        // an unbounded limit returns everything instead of wrapping negative
        assert_eq!(storage.get_recent_turns(usize::MAX).unwrap().len(), 1);
        assert!(storage.get_recent_turns(0).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_history_row_is_an_error() {
        let storage = Storage::in_memory().unwrap();
        let insert = |id: &str, created_at: &str| {
            storage
                .conn
                .lock()
                .execute(
                    r#"
                    INSERT INTO turn_history (id, transcript, reply, correction, total_score,
                                              grammar_score, pronunciation_score, xp_awarded,
                                              source_lang, target_lang, topic, created_at)
                    VALUES (?1, 'Hallo', 'Hallo!', NULL, 50, 50, 50, 1,
                            'de-DE', 'en-US', 'Daily Life', ?2)
                    "#,
                    params![id, created_at],
                )
                .unwrap();
        };

        insert(&Uuid::new_v4().to_string(), "last tuesday");
        match storage.get_recent_turns(10) {
            Err(Error::Storage(rusqlite::Error::FromSqlConversionFailure(11, ..))) => {}
            other => panic!("expected a conversion failure, got {other:?}"),
        }

        storage.conn.lock().execute("DELETE FROM turn_history", []).unwrap();
        insert("not-a-uuid", "2026-05-04T12:00:00+00:00");
        match storage.get_recent_turns(10) {
            Err(Error::Storage(rusqlite::Error::FromSqlConversionFailure(0, ..))) => {}
            other => panic!("expected a conversion failure, got {other:?}"),
        }
    }
}
