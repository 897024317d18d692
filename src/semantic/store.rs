//! Durable storage for indexed files, their chunks and chunk vectors.
//!
//! Backed by SQLite:
//! - `files`: one row per path (unique), content/text hashes and file metadata
//! - `chunks`: `(file_id, chunk_index)` keyed text and vector blob, cascading
//!   on file deletion
//! - `meta`: key/value pairs (active model, dimensions, last index run)
//!
//! Vectors are stored with the fixed-layout encoding from `codec`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::config::AnchorPolicy;
use crate::semantic::codec::{self, CodecError};
use crate::semantic::identity::ContentHash;

const META_MODEL: &str = "model";
const META_DIMENSIONS: &str = "dimensions";
const META_LAST_INDEX_AT: &str = "last_index_at";
const META_LAST_INDEX_DURATION_MS: &str = "last_index_duration_ms";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IDLE_READERS: usize = 8;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        content_hash TEXT NOT NULL,
        text_hash TEXT NOT NULL,
        file_type TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        indexed_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chunks (
        file_id INTEGER NOT NULL REFERENCES files (id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        PRIMARY KEY (file_id, chunk_index)
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks (file_id);

    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted vector for {path}: {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// One indexed file. `path` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: ContentHash,
    pub text_hash: ContentHash,
    /// Lower-case extension without the dot
    pub file_type: String,
    pub size_bytes: u64,
    /// Unix seconds
    pub modified_at: i64,
    /// Unix seconds, when this record was written
    pub indexed_at: i64,
}

/// File metadata carried along with every scanned chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub file_type: String,
    pub size_bytes: u64,
    pub modified_at: i64,
}

/// A chunk as produced by a full scan.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub path: String,
    pub meta: FileMeta,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// SQLite-backed store of files, chunks and vectors.
///
/// Writes go through one connection guarded by a mutex; every mutation is one
/// transaction. File-backed stores serve reads from a pool of read-only
/// connections, so scans never wait on writers (or each other) and each read
/// statement sees a WAL snapshot: the previous or the new chunk set of a file,
/// never a mix. In-memory stores read through the write connection.
pub struct VectorStore {
    writer: Mutex<Connection>,
    readers: Option<ReadPool>,
    path: Option<PathBuf>,
}

/// Idle read-only connections to the database file.
struct ReadPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ReadPool {
    fn checkout(&self) -> Result<Connection, VectorStoreError> {
        let pooled = self
            .idle
            .lock()
            .map_err(|_| VectorStoreError::Poisoned)?
            .pop();
        if let Some(conn) = pooled {
            return Ok(conn);
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(conn);
            }
        }
    }
}

impl VectorStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self, VectorStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Opened index database {} (journal_mode={})", path.display(), mode);

        let readers = ReadPool {
            path: path.to_path_buf(),
            idle: Mutex::new(Vec::new()),
        };
        Self::init(conn, Some(readers), Some(path.to_path_buf()))
    }

    /// Store that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self, VectorStoreError> {
        Self::init(Connection::open_in_memory()?, None, None)
    }

    fn init(
        conn: Connection,
        readers: Option<ReadPool>,
        path: Option<PathBuf>,
    ) -> Result<Self, VectorStoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers,
            path,
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, VectorStoreError> {
        self.writer.lock().map_err(|_| VectorStoreError::Poisoned)
    }

    /// Run read-only statements on a pooled connection (or the write
    /// connection for in-memory stores).
    fn read<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, VectorStoreError>,
    ) -> Result<R, VectorStoreError> {
        match &self.readers {
            Some(pool) => {
                let conn = pool.checkout()?;
                let result = f(&conn);
                pool.checkin(conn);
                result
            }
            None => f(&*self.writer()?),
        }
    }

    /// Replace the record for `record.path` and all of its chunks.
    ///
    /// Chunk indices are assigned from the slice order starting at 0.
    pub fn upsert(
        &self,
        record: &FileRecord,
        chunks: &[(String, Vec<f32>)],
    ) -> Result<(), VectorStoreError> {
        if let Some((i, _)) = chunks.iter().enumerate().find(|(_, (t, _))| t.trim().is_empty()) {
            return Err(VectorStoreError::InvalidRecord(format!(
                "chunk {i} of {} is empty",
                record.path
            )));
        }
        if let Some((_, first)) = chunks.first() {
            if first.is_empty() || chunks.iter().any(|(_, v)| v.len() != first.len()) {
                return Err(VectorStoreError::InvalidRecord(format!(
                    "chunk vectors of {} have inconsistent dimensions",
                    record.path
                )));
            }
        }

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        // cascades to the old chunks
        tx.execute("DELETE FROM files WHERE path = ?1", params![record.path])?;
        tx.execute(
            "INSERT INTO files (path, content_hash, text_hash, file_type, size_bytes, modified_at, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.path,
                record.content_hash.to_hex(),
                record.text_hash.to_hex(),
                record.file_type,
                record.size_bytes as i64,
                record.modified_at,
                record.indexed_at,
            ],
        )?;
        let file_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (file_id, chunk_index, content, embedding) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (index, (text, vector)) in chunks.iter().enumerate() {
                stmt.execute(params![file_id, index as i64, text, codec::encode(vector)])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove a file and its chunks. Returns whether a record existed.
    pub fn delete(&self, path: &str) -> Result<bool, VectorStoreError> {
        let conn = self.writer()?;
        let removed = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    pub fn file_record(&self, path: &str) -> Result<Option<FileRecord>, VectorStoreError> {
        let row = self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT path, content_hash, text_hash, file_type, size_bytes, modified_at, indexed_at
                     FROM files WHERE path = ?1",
                    params![path],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        row.map(
            |(path, content_hash, text_hash, file_type, size, modified_at, indexed_at)| {
                Ok(FileRecord {
                    content_hash: parse_hash(&path, &content_hash)?,
                    text_hash: parse_hash(&path, &text_hash)?,
                    path,
                    file_type,
                    size_bytes: size as u64,
                    modified_at,
                    indexed_at,
                })
            },
        )
        .transpose()
    }

    /// Stored content hash for `path`, if any.
    pub fn content_hash(&self, path: &str) -> Result<Option<ContentHash>, VectorStoreError> {
        let hash: Option<String> = self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT content_hash FROM files WHERE path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        hash.map(|h| parse_hash(path, &h)).transpose()
    }

    /// Representative vector of a file, chosen by `policy`.
    pub fn get_vector(
        &self,
        path: &str,
        policy: AnchorPolicy,
    ) -> Result<Option<Vec<f32>>, VectorStoreError> {
        self.read(|conn| match policy {
            AnchorPolicy::FirstChunk => {
                let blob: Option<Vec<u8>> = conn
                    .query_row(
                        "SELECT c.embedding FROM chunks c JOIN files f ON f.id = c.file_id
                         WHERE f.path = ?1 AND c.chunk_index = 0",
                        params![path],
                        |row| row.get(0),
                    )
                    .optional()?;

                blob.map(|b| decode_vector(path, &b)).transpose()
            }
            AnchorPolicy::Centroid => {
                let mut stmt = conn.prepare(
                    "SELECT c.embedding FROM chunks c JOIN files f ON f.id = c.file_id
                     WHERE f.path = ?1",
                )?;
                let mut rows = stmt.query(params![path])?;

                let mut sum: Vec<f32> = Vec::new();
                let mut count = 0usize;
                while let Some(row) = rows.next()? {
                    let blob: Vec<u8> = row.get(0)?;
                    let vector = decode_vector(path, &blob)?;
                    if sum.is_empty() {
                        sum = vec![0.0; vector.len()];
                    } else if sum.len() != vector.len() {
                        return Err(VectorStoreError::InvalidRecord(format!(
                            "chunk vectors of {path} have inconsistent dimensions"
                        )));
                    }
                    for (acc, value) in sum.iter_mut().zip(vector) {
                        *acc += value;
                    }
                    count += 1;
                }

                if count == 0 {
                    return Ok(None);
                }
                Ok(Some(sum.into_iter().map(|v| v / count as f32).collect()))
            }
        })
    }

    /// Stream every stored chunk into `visit`. Order is unspecified.
    ///
    /// The whole scan is one statement, so it observes a single snapshot of
    /// the store even while other paths are being written.
    pub fn scan_all<F>(&self, mut visit: F) -> Result<(), VectorStoreError>
    where
        F: FnMut(StoredChunk),
    {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.path, f.file_type, f.size_bytes, f.modified_at, c.chunk_index, c.content, c.embedding
                 FROM chunks c JOIN files f ON f.id = c.file_id",
            )?;
            let mut rows = stmt.query([])?;

            while let Some(row) = rows.next()? {
                let path: String = row.get(0)?;
                let blob: Vec<u8> = row.get(6)?;
                let vector = decode_vector(&path, &blob)?;

                visit(StoredChunk {
                    meta: FileMeta {
                        file_type: row.get(1)?,
                        size_bytes: row.get::<_, i64>(2)? as u64,
                        modified_at: row.get(3)?,
                    },
                    chunk_index: row.get::<_, i64>(4)? as usize,
                    text: row.get(5)?,
                    vector,
                    path,
                });
            }

            Ok(())
        })
    }

    /// Chunk texts of one file in index order.
    pub fn chunk_texts(&self, path: &str) -> Result<Vec<(usize, String)>, VectorStoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.chunk_index, c.content FROM chunks c JOIN files f ON f.id = c.file_id
                 WHERE f.path = ?1 ORDER BY c.chunk_index",
            )?;
            let rows = stmt.query_map(params![path], |row| {
                Ok((row.get::<_, i64>(0)? as usize, row.get::<_, String>(1)?))
            })?;

            let mut chunks = Vec::new();
            for row in rows {
                chunks.push(row?);
            }
            Ok(chunks)
        })
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Result<Vec<String>, VectorStoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT path FROM files ORDER BY path")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut paths = Vec::new();
            for row in rows {
                paths.push(row?);
            }
            Ok(paths)
        })
    }

    /// `(files, chunks)` currently stored.
    pub fn counts(&self) -> Result<(usize, usize), VectorStoreError> {
        let (files, chunks): (i64, i64) = self.read(|conn| {
            Ok(conn.query_row(
                "SELECT (SELECT COUNT(*) FROM files), (SELECT COUNT(*) FROM chunks)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })?;
        Ok((files as usize, chunks as usize))
    }

    pub fn meta_get(&self, key: &str) -> Result<Option<String>, VectorStoreError> {
        self.read(|conn| {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<(), VectorStoreError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Record the active model. If a different model or dimension was
    /// recorded before, every file is dropped so vectors never mix.
    ///
    /// Returns true when existing records were cleared.
    pub fn ensure_model(&self, model: &str, dimensions: usize) -> Result<bool, VectorStoreError> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let stored_model: Option<String> = tx
            .query_row("SELECT value FROM meta WHERE key = ?1", params![META_MODEL], |row| {
                row.get(0)
            })
            .optional()?;
        let stored_dims: Option<String> = tx
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![META_DIMENSIONS],
                |row| row.get(0),
            )
            .optional()?;

        let dims = dimensions.to_string();
        let changed = match (&stored_model, &stored_dims) {
            (Some(m), Some(d)) => m != model || *d != dims,
            _ => false,
        };

        if changed {
            log::warn!(
                "Model changed ({} -> {}), clearing index",
                stored_model.as_deref().unwrap_or("?"),
                model
            );
            tx.execute("DELETE FROM files", [])?;
        }

        for (key, value) in [(META_MODEL, model), (META_DIMENSIONS, dims.as_str())] {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(changed)
    }

    /// Remember when the last directory index finished and how long it took.
    pub fn record_index_run(&self, at: i64, duration: Duration) -> Result<(), VectorStoreError> {
        self.meta_set(META_LAST_INDEX_AT, &at.to_string())?;
        self.meta_set(
            META_LAST_INDEX_DURATION_MS,
            &(duration.as_millis() as u64).to_string(),
        )
    }

    /// `(finished_at, duration)` of the last recorded index run.
    pub fn last_index_run(&self) -> Result<Option<(i64, Duration)>, VectorStoreError> {
        let at = self.meta_get(META_LAST_INDEX_AT)?.and_then(|v| v.parse::<i64>().ok());
        let ms = self
            .meta_get(META_LAST_INDEX_DURATION_MS)?
            .and_then(|v| v.parse::<u64>().ok());

        Ok(at.zip(ms).map(|(at, ms)| (at, Duration::from_millis(ms))))
    }

    /// Model name and dimensions recorded by `ensure_model`.
    pub fn active_model(&self) -> Result<Option<(String, usize)>, VectorStoreError> {
        let model = self.meta_get(META_MODEL)?;
        let dims = self
            .meta_get(META_DIMENSIONS)?
            .and_then(|v| v.parse::<usize>().ok());
        Ok(model.zip(dims))
    }
}

fn parse_hash(path: &str, hex: &str) -> Result<ContentHash, VectorStoreError> {
    ContentHash::from_str(hex)
        .map_err(|e| VectorStoreError::InvalidRecord(format!("{path}: {e}")))
}

fn decode_vector(path: &str, blob: &[u8]) -> Result<Vec<f32>, VectorStoreError> {
    codec::decode(blob).map_err(|source| VectorStoreError::Codec {
        path: path.to_string(),
        source,
    })
}
