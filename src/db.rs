//! Metadata DB: one row per `(chunk_id, provider,
//! dimensions)` triple, embeddings stored as little-endian `float32[]`
//! blobs. Backed by `rusqlite` with the bundled SQLite amalgamation so the
//! binary carries no system SQLite dependency — grounded on the pack's
//! `josongsong-semantica-codegraph` choice of the same crate/feature pair.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::chunk::Chunk;
use crate::error::Result;

pub struct MetadataDb {
    conn: Connection,
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl MetadataDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT NOT NULL,
                file TEXT NOT NULL,
                symbol TEXT NOT NULL,
                sha TEXT NOT NULL,
                lang TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                provider TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                symbol_signature TEXT,
                symbol_parameters TEXT,
                symbol_return TEXT,
                symbol_calls TEXT,
                symbol_neighbors TEXT,
                tags TEXT NOT NULL,
                intent TEXT,
                description TEXT,
                docs TEXT,
                encrypted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (chunk_id, provider, dimensions)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file);
            CREATE INDEX IF NOT EXISTS idx_chunks_provider_dims ON chunks(provider, dimensions);

            CREATE TABLE IF NOT EXISTS query_patterns (
                pattern TEXT PRIMARY KEY,
                count INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT
            );

            CREATE TABLE IF NOT EXISTS intentions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                normalized_query TEXT NOT NULL,
                raw_query TEXT NOT NULL,
                top_sha TEXT,
                score REAL,
                recorded_at TEXT
            );
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        self.conn.execute(
            "INSERT INTO chunks (
                chunk_id, file, symbol, sha, lang, chunk_type, provider, dimensions, embedding,
                symbol_signature, symbol_parameters, symbol_return, symbol_calls, symbol_neighbors,
                tags, intent, description, docs, encrypted
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
            ON CONFLICT(chunk_id, provider, dimensions) DO UPDATE SET
                file=excluded.file, symbol=excluded.symbol, sha=excluded.sha, lang=excluded.lang,
                chunk_type=excluded.chunk_type, embedding=excluded.embedding,
                symbol_signature=excluded.symbol_signature, symbol_parameters=excluded.symbol_parameters,
                symbol_return=excluded.symbol_return, symbol_calls=excluded.symbol_calls,
                symbol_neighbors=excluded.symbol_neighbors, tags=excluded.tags, intent=excluded.intent,
                description=excluded.description, docs=excluded.docs, encrypted=excluded.encrypted",
            params![
                chunk.chunk_id,
                chunk.file,
                chunk.symbol,
                chunk.sha,
                chunk.lang,
                chunk.chunk_type,
                chunk.embedding_provider,
                chunk.embedding_dimensions as i64,
                encode_embedding(&chunk.embedding),
                chunk.symbol_signature,
                chunk.symbol_parameters.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()),
                chunk.symbol_return,
                chunk.symbol_calls.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()),
                chunk.symbol_neighbors.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()),
                serde_json::to_string(&chunk.tags).unwrap_or_default(),
                chunk.intent,
                chunk.description,
                chunk.docs,
                chunk.encrypted as i64,
            ],
        )?;
        Ok(())
    }

    pub fn delete_chunks(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.conn.execute("DELETE FROM chunks WHERE chunk_id = ?1", params![id])?;
        }
        Ok(())
    }

    pub fn delete_by_file_path(&self, rel: &str) -> Result<()> {
        self.conn.execute("DELETE FROM chunks WHERE file = ?1", params![rel])?;
        Ok(())
    }

    pub fn get_chunks(&self, provider: &str, dimensions: usize) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_id, file, symbol, sha, lang, chunk_type, provider, dimensions, embedding,
                    symbol_signature, symbol_parameters, symbol_return, symbol_calls, symbol_neighbors,
                    tags, intent, description, docs, encrypted
             FROM chunks WHERE provider = ?1 AND dimensions = ?2",
        )?;
        let rows = stmt.query_map(params![provider, dimensions as i64], row_to_chunk)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_overview_chunks(&self, limit: usize) -> Result<Vec<Chunk>> {
        // Prefer top-level function-like chunks: shorter chunk_type strings
        // tend to be un-merged, single-symbol units rather than `_group_N`
        // fallbacks, matching the "top-level functions preferred" heuristic.
        let mut stmt = self.conn.prepare(
            "SELECT chunk_id, file, symbol, sha, lang, chunk_type, provider, dimensions, embedding,
                    symbol_signature, symbol_parameters, symbol_return, symbol_calls, symbol_neighbors,
                    tags, intent, description, docs, encrypted
             FROM chunks
             ORDER BY (chunk_type LIKE '%_group_%') ASC, LENGTH(chunk_type) ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_chunk)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_all_file_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT file FROM chunks")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_existing_dimensions(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT provider, dimensions FROM chunks")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn record_query_pattern(&self, pattern: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO query_patterns (pattern, count, last_seen) VALUES (?1, 1, datetime('now'))
             ON CONFLICT(pattern) DO UPDATE SET count = count + 1, last_seen = datetime('now')",
            params![pattern],
        )?;
        Ok(())
    }

    pub fn record_intention(&self, normalized_query: &str, raw_query: &str, top_sha: Option<&str>, score: f32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO intentions (normalized_query, raw_query, top_sha, score, recorded_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![normalized_query, raw_query, top_sha, score as f64],
        )?;
        Ok(())
    }

    pub fn chunk_exists(&self, chunk_id: &str) -> Result<bool> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM chunks WHERE chunk_id = ?1 LIMIT 1", params![chunk_id], |r| r.get(0))
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let embedding_bytes: Vec<u8> = row.get(8)?;
    let parameters: Option<String> = row.get(11)?;
    let calls: Option<String> = row.get(12)?;
    let neighbors: Option<String> = row.get(13)?;
    let tags: String = row.get(14)?;

    Ok(Chunk {
        chunk_id: row.get(0)?,
        file: row.get(1)?,
        symbol: row.get(2)?,
        sha: row.get(3)?,
        lang: row.get(4)?,
        chunk_type: row.get(5)?,
        embedding_provider: row.get(6)?,
        embedding_dimensions: row.get::<_, i64>(7)? as usize,
        embedding: decode_embedding(&embedding_bytes),
        symbol_signature: row.get(9)?,
        symbol_parameters: parameters.and_then(|s| serde_json::from_str(&s).ok()),
        symbol_return: row.get(10)?,
        symbol_calls: calls.and_then(|s| serde_json::from_str(&s).ok()),
        symbol_neighbors: neighbors.and_then(|s| serde_json::from_str(&s).ok()),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        intent: row.get(15)?,
        description: row.get(16)?,
        docs: row.get(17)?,
        variable_count: 0,
        encrypted: row.get::<_, i64>(18)? != 0,
        code: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            sha: "abc123".into(),
            file: "src/a.rs".into(),
            symbol: "foo".into(),
            lang: "rust".into(),
            chunk_type: "function_item".into(),
            embedding: vec![0.1, 0.2, 0.3],
            embedding_provider: "mock".into(),
            embedding_dimensions: 3,
            symbol_signature: Some("fn foo()".into()),
            symbol_parameters: None,
            symbol_return: None,
            symbol_calls: None,
            symbol_neighbors: None,
            tags: vec!["auth".into()],
            intent: Some("test".into()),
            description: None,
            docs: None,
            variable_count: 0,
            encrypted: false,
            code: "fn foo() {}".into(),
        }
    }

    #[test]
    fn insert_and_get_chunks_round_trips_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        db.insert_chunk(&sample_chunk("src/a.rs:foo:abc123")).unwrap();
        let got = db.get_chunks("mock", 3).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].embedding, vec![0.1, 0.2, 0.3]);
        assert_eq!(got[0].tags, vec!["auth".to_string()]);
    }

    #[test]
    fn delete_by_file_path_removes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        db.insert_chunk(&sample_chunk("src/a.rs:foo:abc123")).unwrap();
        db.delete_by_file_path("src/a.rs").unwrap();
        assert!(db.get_chunks("mock", 3).unwrap().is_empty());
    }

    #[test]
    fn existing_dimensions_reports_distinct_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        db.insert_chunk(&sample_chunk("src/a.rs:foo:abc123")).unwrap();
        let dims = db.get_existing_dimensions().unwrap();
        assert_eq!(dims, vec![("mock".to_string(), 3)]);
    }
}
