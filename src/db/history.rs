use super::HistoryStore;
use crate::indexer::IngestionReport;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result, params};
use serde::Serialize;
use serde_json::Value;

/// One stored question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub chats: usize,
    /// Documents indexed by the most recent recorded ingestion run.
    pub documents: usize,
}

impl HistoryStore {
    /// Stores a question/answer pair and returns its row id
    pub fn save_chat(&self, question: &str, answer: &str, metadata: Option<&Value>) -> Result<i64> {
        let metadata = metadata
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        self.conn.execute(
            "INSERT INTO chat_history (question, answer, timestamp, metadata) VALUES (?, ?, ?, ?)",
            params![question, answer, Utc::now(), metadata.to_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Returns up to `limit` chats, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<ChatRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, question, answer, timestamp, metadata FROM chat_history
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let metadata: String = row.get(4)?;
            Ok(ChatRecord {
                id: row.get(0)?,
                question: row.get(1)?,
                answer: row.get(2)?,
                timestamp: row.get(3)?,
                // Rows are only written by save_chat; fall back rather than fail.
                metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            })
        })?;
        rows.collect()
    }

    /// Deletes every chat, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        self.conn.execute("DELETE FROM chat_history", [])
    }

    /// Records the outcome of an ingestion run
    pub fn record_ingestion(&self, report: &IngestionReport) -> Result<()> {
        let status = serde_json::to_value(report.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.conn.execute(
            "INSERT INTO ingestion_runs (status, documents, chunks, failures, finished_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                status,
                report.documents_loaded as i64,
                report.chunks_created as i64,
                report.failures.len() as i64,
                Utc::now()
            ],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        let chats: i64 = self
            .conn
            .query_row("SELECT count(*) FROM chat_history", [], |row| row.get(0))?;
        let documents: Option<i64> = self
            .conn
            .query_row(
                "SELECT documents FROM ingestion_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(HistoryStats {
            chats: chats as usize,
            documents: documents.unwrap_or(0) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{FileFailure, IngestionStatus};
    use serde_json::json;

    #[test]
    fn test_save_and_recent_newest_first() {
        let db = HistoryStore::open_in_memory().unwrap();
        let first = db.save_chat("What color is the sky?", "Blue.", None).unwrap();
        let second = db
            .save_chat("Is water wet?", "Yes.", Some(&json!({"sources": ["water.txt"]})))
            .unwrap();
        assert!(second > first);

        let history = db.recent(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question, "Is water wet?");
        assert_eq!(history[0].metadata["sources"][0], "water.txt");
        assert_eq!(history[1].answer, "Blue.");
        assert_eq!(history[1].metadata, json!({}));

        assert_eq!(db.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_clear() {
        let db = HistoryStore::open_in_memory().unwrap();
        db.save_chat("a", "b", None).unwrap();
        db.save_chat("c", "d", None).unwrap();

        assert_eq!(db.clear().unwrap(), 2);
        assert!(db.recent(10).unwrap().is_empty());
        assert_eq!(db.stats().unwrap().chats, 0);
    }

    #[test]
    fn test_stats_track_latest_ingestion() {
        let db = HistoryStore::open_in_memory().unwrap();
        assert_eq!(db.stats().unwrap(), HistoryStats::default());

        let mut report = IngestionReport {
            documents_loaded: 3,
            documents_skipped: 0,
            chunks_created: 12,
            failures: vec![],
            status: IngestionStatus::Complete,
        };
        db.record_ingestion(&report).unwrap();
        report.documents_loaded = 2;
        report.status = IngestionStatus::Partial;
        report.failures.push(FileFailure {
            path: "bad.txt".into(),
            error: "invalid UTF-8".into(),
        });
        db.record_ingestion(&report).unwrap();
        db.save_chat("q", "a", None).unwrap();

        assert_eq!(db.stats().unwrap(), HistoryStats { chats: 1, documents: 2 });
        let status: String = db
            .conn
            .query_row(
                "SELECT status FROM ingestion_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "partial");
    }
}
