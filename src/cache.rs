// lmfetch/src/cache.rs

use anyhow::{
    Context,
    Result
};
use rusqlite::{
    params,
    Connection
};
use std::{
    fs,
    path::{
        Path,
        PathBuf
    },
};
use crate::{
    chunk::{
        Chunk,
        ChunkKind
    },
    source::SourceFile,
    tokens,
    util,
};

/// Files untouched for this long are evicted on prune().
const PRUNE_TTL_DAYS: i64 = 30;

/// Chunk rows ride on the file row via cascade, so a file delete can never
/// leave orphans.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    language TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    kind TEXT NOT NULL,
    name TEXT
);

CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
"#;

/// Persistent chunk cache; skips re-chunking files whose mtime hasn't moved.
pub struct ChunkCache {
    conn: Connection,
}

impl ChunkCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating cache dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening chunk cache {}", path.display()))?;
        // One exclusive session per run; concurrent runs against the same
        // cache file are not supported.
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("enabling foreign keys")?;
        conn.pragma_update(None, "locking_mode", "exclusive")
            .context("taking exclusive cache lock")?;
        conn.execute_batch(SCHEMA)
            .context("initializing chunk cache schema")?;
        Ok(Self { conn })
    }

    /// Default location: `$HOME/.cache/lmfetch/cache.db`.
    pub fn default_path() -> Result<PathBuf> {
        Ok(cache_root()?.join("cache.db"))
    }

    /// True iff a files row exists with mtime at least as new AND at least
    /// one chunk row. A hit bumps last_accessed.
    pub fn has_fresh_chunks(&self, path: &str, mtime: i64) -> Result<bool> {
        let fresh: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM files f
                     WHERE f.path = ?1 AND f.mtime >= ?2
                       AND EXISTS(SELECT 1 FROM chunks c WHERE c.file_path = f.path)
                 )",
                params![path, mtime],
                |row| row.get(0),
            )
            .context("querying chunk freshness")?;
        if fresh {
            self.conn
                .execute(
                    "UPDATE files SET last_accessed = ?2 WHERE path = ?1",
                    params![path, util::now_unix()],
                )
                .context("bumping last_accessed")?;
        }
        Ok(fresh)
    }

    /// Rehydrate the cached chunks of a file, in line order. Token counts and
    /// ids are recomputed (both are pure functions of the row data).
    pub fn get_chunks(&self, file: &SourceFile) -> Result<Vec<Chunk>> {
        let path = file.path.to_string_lossy().to_string();
        let mut stmt = self
            .conn
            .prepare(
                "SELECT content, start_line, end_line, kind, name
                 FROM chunks WHERE file_path = ?1 ORDER BY start_line",
            )
            .context("preparing chunk select")?;
        let rows = stmt
            .query_map(params![path], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .context("querying cached chunks")?;

        let mut chunks = Vec::new();
        for row in rows {
            let (content, start_line, end_line, kind, name) = row?;
            let start_line = start_line.max(1) as usize;
            let tokens = tokens::count(&content);
            chunks.push(Chunk {
                id: Chunk::stable_id(&file.rel_path, start_line),
                path: path.clone(),
                rel_path: file.rel_path.clone(),
                content,
                start_line,
                end_line: end_line.max(1) as usize,
                kind: ChunkKind::parse(&kind),
                name,
                lang: file.lang.clone(),
                tokens,
            });
        }
        Ok(chunks)
    }

    /// Upsert the files row; the content hash is stored for later
    /// verification but freshness checks stay on mtime.
    pub fn put_file(&self, file: &SourceFile) -> Result<()> {
        let path = file.path.to_string_lossy().to_string();
        self.conn
            .execute(
                "INSERT INTO files (path, content_hash, mtime, size, last_accessed, language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(path) DO UPDATE SET
                     content_hash = excluded.content_hash,
                     mtime = excluded.mtime,
                     size = excluded.size,
                     last_accessed = excluded.last_accessed,
                     language = excluded.language",
                params![
                    path,
                    util::sha256_hex(&file.content),
                    file.mtime,
                    file.size as i64,
                    util::now_unix(),
                    file.lang,
                ],
            )
            .context("upserting files row")?;
        Ok(())
    }

    /// Replace all chunk rows for a file in one transaction.
    pub fn put_chunks(&mut self, path: &str, chunks: &[Chunk]) -> Result<()> {
        let tx = self.conn.transaction().context("starting chunk txn")?;
        tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![path])
            .context("clearing stale chunks")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO chunks (file_path, content, start_line, end_line, kind, name)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .context("preparing chunk insert")?;
            for c in chunks {
                stmt.execute(params![
                    path,
                    c.content,
                    c.start_line as i64,
                    c.end_line as i64,
                    c.kind.as_str(),
                    c.name,
                ])
                .context("inserting chunk row")?;
            }
        }
        tx.commit().context("committing chunk txn")?;
        Ok(())
    }

    /// Evict files not touched within the TTL; cascade removes their chunks.
    /// Returns the number of evicted files. Pruning twice is a no-op.
    pub fn prune(&self) -> Result<usize> {
        let cutoff = util::now_unix() - PRUNE_TTL_DAYS * 24 * 60 * 60;
        let n = self
            .conn
            .execute(
                "DELETE FROM files WHERE last_accessed < ?1",
                params![cutoff],
            )
            .context("pruning stale files")?;
        Ok(n)
    }

    /// Empty both relations.
    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM chunks", [])
            .context("clearing chunks")?;
        self.conn
            .execute("DELETE FROM files", [])
            .context("clearing files")?;
        Ok(())
    }

    #[cfg(test)]
    fn set_last_accessed(&self, path: &str, when: i64) {
        self.conn
            .execute(
                "UPDATE files SET last_accessed = ?2 WHERE path = ?1",
                params![path, when],
            )
            .unwrap();
    }

    #[cfg(test)]
    fn chunk_row_count(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))
            .unwrap()
    }
}

/// `$HOME/.cache/lmfetch/`: cache.db, embeddings/, repos/ all live here.
pub fn cache_root() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("no cache directory on this platform")?;
    Ok(base.join("lmfetch"))
}

/* ----------------------------------- tests ----------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker;
    use tempfile::TempDir;

    fn sample_file(dir: &Path, mtime: i64) -> SourceFile {
        let body: String = (0..15).map(|i| format!("    x = {i}\n")).collect();
        SourceFile {
            path: dir.join("auth.py"),
            rel_path: "auth.py".to_string(),
            content: format!("def login(user):\n{body}"),
            lang: "python".to_string(),
            size: 100,
            mtime,
        }
    }

    fn open_cache(dir: &TempDir) -> ChunkCache {
        ChunkCache::open(&dir.path().join("cache.db")).unwrap()
    }

    #[test]
    fn miss_then_hit_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut cache = open_cache(&dir);
        let file = sample_file(dir.path(), 100);
        let path = file.path.to_string_lossy().to_string();

        assert!(!cache.has_fresh_chunks(&path, 100).unwrap());

        let chunks = chunker::chunk_file(&file);
        assert!(!chunks.is_empty());
        cache.put_file(&file).unwrap();
        cache.put_chunks(&path, &chunks).unwrap();

        assert!(cache.has_fresh_chunks(&path, 100).unwrap());
        let loaded = cache.get_chunks(&file).unwrap();
        assert_eq!(loaded.len(), chunks.len());
        assert_eq!(loaded[0].id, chunks[0].id);
        assert_eq!(loaded[0].content, chunks[0].content);
        assert_eq!(loaded[0].kind, chunks[0].kind);
        assert_eq!(loaded[0].tokens, chunks[0].tokens);
    }

    #[test]
    fn newer_mtime_invalidates() {
        let dir = TempDir::new().unwrap();
        let mut cache = open_cache(&dir);
        let file = sample_file(dir.path(), 100);
        let path = file.path.to_string_lossy().to_string();

        cache.put_file(&file).unwrap();
        cache.put_chunks(&path, &chunker::chunk_file(&file)).unwrap();

        // File on disk now newer than the cached row.
        assert!(!cache.has_fresh_chunks(&path, 200).unwrap());
        // Equal or older on-disk mtime is still fresh.
        assert!(cache.has_fresh_chunks(&path, 100).unwrap());
        assert!(cache.has_fresh_chunks(&path, 50).unwrap());
    }

    #[test]
    fn file_row_without_chunks_is_not_fresh() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        let file = sample_file(dir.path(), 100);
        let path = file.path.to_string_lossy().to_string();

        cache.put_file(&file).unwrap();
        assert!(!cache.has_fresh_chunks(&path, 100).unwrap());
    }

    #[test]
    fn put_chunks_replaces_previous_rows() {
        let dir = TempDir::new().unwrap();
        let mut cache = open_cache(&dir);
        let file = sample_file(dir.path(), 100);
        let path = file.path.to_string_lossy().to_string();
        let chunks = chunker::chunk_file(&file);

        cache.put_file(&file).unwrap();
        cache.put_chunks(&path, &chunks).unwrap();
        cache.put_chunks(&path, &chunks).unwrap();

        assert_eq!(cache.get_chunks(&file).unwrap().len(), chunks.len());
    }

    #[test]
    fn prune_is_monotone_and_cascades() {
        let dir = TempDir::new().unwrap();
        let mut cache = open_cache(&dir);
        let file = sample_file(dir.path(), 100);
        let path = file.path.to_string_lossy().to_string();

        cache.put_file(&file).unwrap();
        cache.put_chunks(&path, &chunker::chunk_file(&file)).unwrap();
        assert!(cache.chunk_row_count() > 0);

        // Not stale yet.
        assert_eq!(cache.prune().unwrap(), 0);

        // Age it past the TTL; prune evicts file and chunk rows together.
        cache.set_last_accessed(&path, util::now_unix() - 40 * 24 * 60 * 60);
        assert_eq!(cache.prune().unwrap(), 1);
        assert_eq!(cache.chunk_row_count(), 0);

        // Second prune is a no-op.
        assert_eq!(cache.prune().unwrap(), 0);
    }

    #[test]
    fn clear_empties_both_relations() {
        let dir = TempDir::new().unwrap();
        let mut cache = open_cache(&dir);
        let file = sample_file(dir.path(), 100);
        let path = file.path.to_string_lossy().to_string();

        cache.put_file(&file).unwrap();
        cache.put_chunks(&path, &chunker::chunk_file(&file)).unwrap();
        cache.clear().unwrap();

        assert!(!cache.has_fresh_chunks(&path, 100).unwrap());
        assert_eq!(cache.chunk_row_count(), 0);
    }
}
