//! Vector index on SQLite and sqlite-vec.
//!
//! The working copy lives in an in-memory database. `build` recreates the
//! schema inside one transaction, `save` writes the database to a file with
//! the online backup API and `load` restores such a file into memory, so the
//! persisted copy is never modified by later builds.
use std::path::Path;
use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::{debug, info, warn};

use super::{IndexError, VectorIndex, check_k, common_dimensions};
use crate::models::{Chunk, IndexEntry, ScoredChunk};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    position INTEGER PRIMARY KEY,
    chunk_id TEXT NOT NULL,
    document_id TEXT NOT NULL,
    source TEXT NOT NULL,
    sequence_index INTEGER NOT NULL,
    char_offset INTEGER NOT NULL,
    content TEXT NOT NULL
);
"#;

const SEARCH_SQL: &str = r#"
SELECT
    c.chunk_id,
    c.document_id,
    c.source,
    c.sequence_index,
    c.char_offset,
    c.content,
    vec_distance_cosine(v.embedding, ?1) AS distance
FROM vec_chunks v
JOIN chunks c ON c.position = v.rowid
ORDER BY distance IS NULL, distance ASC, c.position ASC
LIMIT ?2
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// sqlite-vec backed index.
pub struct SqliteVecIndex {
    conn: Mutex<Connection>,
}

impl SqliteVecIndex {
    /// Create an empty in-memory index.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;

        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec version: {vec_version}");

        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_dimensions(conn: &Connection) -> Result<usize, IndexError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'dimensions'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| IndexError::Corrupt(format!("invalid dimensions value {v:?}"))),
    }
}

fn count_chunks(conn: &Connection) -> Result<usize, IndexError> {
    let count: i64 = conn.query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))?;
    Ok(count as usize)
}

fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoredChunk> {
    let distance: Option<f64> = row.get(6)?;
    let score = distance.map_or(0.0, |d| (1.0 - d) as f32);

    Ok(ScoredChunk {
        chunk: Chunk {
            id: row.get(0)?,
            document_id: row.get(1)?,
            source: row.get(2)?,
            sequence_index: row.get::<_, i64>(3)? as usize,
            char_offset: row.get::<_, i64>(4)? as usize,
            text: row.get(5)?,
        },
        score,
    })
}

impl VectorIndex for SqliteVecIndex {
    fn build(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let dimensions = common_dimensions(&entries)?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute_batch(
            "DROP TABLE IF EXISTS vec_chunks; DROP TABLE IF EXISTS chunks; DROP TABLE IF EXISTS index_meta;",
        )?;
        tx.execute_batch(SCHEMA_SQL)?;
        tx.execute(
            "INSERT INTO index_meta (key, value) VALUES ('dimensions', ?1)",
            params![dimensions.to_string()],
        )?;

        if dimensions > 0 {
            tx.execute_batch(&format!(
                "CREATE VIRTUAL TABLE vec_chunks USING vec0(embedding FLOAT[{dimensions}]);"
            ))?;

            let mut insert_chunk = tx.prepare(
                "INSERT INTO chunks (position, chunk_id, document_id, source, sequence_index, char_offset, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut insert_vec =
                tx.prepare("INSERT INTO vec_chunks (rowid, embedding) VALUES (?1, ?2)")?;

            // Positions start at 1; they double as vec0 rowids.
            for (i, entry) in entries.iter().enumerate() {
                let position = i as i64 + 1;
                let chunk = &entry.chunk;
                insert_chunk.execute(params![
                    position,
                    chunk.id,
                    chunk.document_id,
                    chunk.source,
                    chunk.sequence_index as i64,
                    chunk.char_offset as i64,
                    chunk.text,
                ])?;
                let blob: &[u8] = bytemuck::cast_slice(entry.vector.as_slice());
                insert_vec.execute(params![position, blob])?;
            }
        }

        tx.commit()?;
        debug!("Built sqlite-vec index: {} chunks x {dimensions} dims", entries.len());
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        check_k(k)?;

        let conn = self.lock();
        let dimensions = read_dimensions(&conn)?;
        if dimensions == 0 || count_chunks(&conn)? == 0 {
            return Ok(Vec::new());
        }
        if query.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                actual: query.len(),
            });
        }

        let blob: &[u8] = bytemuck::cast_slice(query);
        let mut stmt = conn.prepare_cached(SEARCH_SQL)?;
        let rows = stmt.query_map(params![blob, k as i64], map_search_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Back up beside the target, then rename into place.
        let tmp = path.with_extension("tmp");
        remove_if_exists(&tmp)?;

        let conn = self.lock();
        if let Err(e) = conn.backup(DatabaseName::Main, &tmp, None) {
            if let Err(cleanup) = remove_if_exists(&tmp) {
                warn!("Failed to remove {}: {cleanup}", tmp.display());
            }
            return Err(e.into());
        }
        std::fs::rename(&tmp, path)?;
        info!(
            "Saved sqlite-vec index ({} chunks) to {}",
            count_chunks(&conn)?,
            path.display()
        );
        Ok(())
    }

    fn load(path: &Path) -> Result<Self, IndexError> {
        if !path.is_file() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }

        let index = Self::open_in_memory()?;
        {
            let mut conn = index.lock();
            conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)
                .map_err(|e| IndexError::Corrupt(format!("{}: {e}", path.display())))?;

            let dimensions = read_dimensions(&conn)
                .map_err(|e| IndexError::Corrupt(format!("{}: {e}", path.display())))?;
            let count = count_chunks(&conn)
                .map_err(|e| IndexError::Corrupt(format!("{}: {e}", path.display())))?;
            if count > 0 {
                let vectors: i64 = conn
                    .query_row("SELECT count(*) FROM vec_chunks", [], |row| row.get(0))
                    .map_err(|e| IndexError::Corrupt(format!("{}: {e}", path.display())))?;
                if vectors as usize != count || dimensions == 0 {
                    return Err(IndexError::Corrupt(format!(
                        "{}: {count} chunks but {vectors} vectors of dimension {dimensions}",
                        path.display()
                    )));
                }
            }
            info!("Loaded sqlite-vec index ({count} chunks) from {}", path.display());
        }
        Ok(index)
    }

    fn len(&self) -> usize {
        match count_chunks(&self.lock()) {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count indexed chunks: {e}");
                0
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
