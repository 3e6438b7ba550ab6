//! Pluggable persistence backends for memory records.
//!
//! Every backend is namespaced per character and keeps two logical
//! collections per character, one per [`MemoryTier`]. Records are keyed by
//! their [`MemoryId`]; a `put` with an existing id replaces the record.
//!
//! The SQLite schema is intentionally simple:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS memory_records (
//!     character_id TEXT NOT NULL,
//!     tier         TEXT NOT NULL,
//!     id           TEXT NOT NULL,
//!     data         BLOB NOT NULL,
//!     created_at   TEXT NOT NULL,
//!     checksum     TEXT,
//!     PRIMARY KEY (character_id, tier, id)
//! );
//! ```
//!
//! - WAL mode for concurrent reads while a cycle writes.
//! - JSON inside a BLOB column keeps the schema stable as records grow fields.
//! - Optional CRC-32 checksum detects corruption.
//! - Backup support via SQLite's online-backup API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{MemoryError, Result};
use crate::types::{CharacterId, MemoryId, MemoryRecord, MemoryTier};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Storage capability consumed by [`crate::store::MemoryStore`].
///
/// Implementations must be `Send + Sync`; the store calls them from
/// blocking worker threads.
pub trait MemoryBackend: Send + Sync {
    /// Insert or replace `record` in `tier` of its owner's namespace.
    ///
    /// # Errors
    /// Returns an error if the write cannot be completed.
    fn put(&self, tier: MemoryTier, record: &MemoryRecord) -> Result<()>;

    /// Fetch one record.
    ///
    /// # Errors
    /// Returns an error if the read cannot be completed.
    fn get(&self, character: &CharacterId, tier: MemoryTier, id: MemoryId)
    -> Result<Option<MemoryRecord>>;

    /// Delete one record. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error if the delete cannot be completed.
    fn remove(&self, character: &CharacterId, tier: MemoryTier, id: MemoryId) -> Result<bool>;

    /// All records in `tier`, in no particular order.
    ///
    /// # Errors
    /// Returns an error if the read cannot be completed.
    fn list(&self, character: &CharacterId, tier: MemoryTier) -> Result<Vec<MemoryRecord>>;

    /// Number of records in `tier`.
    ///
    /// # Errors
    /// Returns an error if the read cannot be completed.
    fn count(&self, character: &CharacterId, tier: MemoryTier) -> Result<usize>;

    /// Delete every record of `character` in both tiers. Returns how many
    /// were removed.
    ///
    /// # Errors
    /// Returns an error if the delete cannot be completed.
    fn clear(&self, character: &CharacterId) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

type Namespace = (CharacterId, MemoryTier);

/// Process-local backend; contents are lost on exit.
#[derive(Default)]
pub struct InMemoryBackend {
    collections: RwLock<HashMap<Namespace, HashMap<MemoryId, MemoryRecord>>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryBackend for InMemoryBackend {
    fn put(&self, tier: MemoryTier, record: &MemoryRecord) -> Result<()> {
        self.collections
            .write()
            .entry((record.character_id.clone(), tier))
            .or_default()
            .insert(record.id, record.clone());
        Ok(())
    }

    fn get(
        &self,
        character: &CharacterId,
        tier: MemoryTier,
        id: MemoryId,
    ) -> Result<Option<MemoryRecord>> {
        Ok(self
            .collections
            .read()
            .get(&(character.clone(), tier))
            .and_then(|c| c.get(&id))
            .cloned())
    }

    fn remove(&self, character: &CharacterId, tier: MemoryTier, id: MemoryId) -> Result<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(&(character.clone(), tier))
            .is_some_and(|c| c.remove(&id).is_some()))
    }

    fn list(&self, character: &CharacterId, tier: MemoryTier) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .collections
            .read()
            .get(&(character.clone(), tier))
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, character: &CharacterId, tier: MemoryTier) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .get(&(character.clone(), tier))
            .map_or(0, HashMap::len))
    }

    fn clear(&self, character: &CharacterId) -> Result<usize> {
        let mut collections = self.collections.write();
        let mut removed = 0;
        for tier in MemoryTier::ALL {
            if let Some(c) = collections.remove(&(character.clone(), tier)) {
                removed += c.len();
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

/// CRC-32 (ISO 3309 / ITU-T V.42).
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memory_records (
    character_id TEXT NOT NULL,
    tier         TEXT NOT NULL,
    id           TEXT NOT NULL,
    data         BLOB NOT NULL,
    created_at   TEXT NOT NULL,
    checksum     TEXT,
    PRIMARY KEY (character_id, tier, id)
);";

/// Durable backend on a single SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "memory database opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn decode(&self, data: &[u8], stored_checksum: Option<&str>, id: &str) -> Result<MemoryRecord> {
        if self.config.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(data);
                if expected != actual {
                    warn!(
                        id,
                        expected,
                        actual = %actual,
                        "checksum mismatch, possible corruption"
                    );
                }
            }
        }
        serde_json::from_slice(data).map_err(|e| MemoryError::Serialization(e.to_string()))
    }

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let conn = self.conn.lock();
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "database backup completed"
        );
        Ok(())
    }

    /// Returns `Ok(true)` if `PRAGMA integrity_check` reports `ok`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Path of the database file (`:memory:` for in-memory databases).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl MemoryBackend for SqliteBackend {
    fn put(&self, tier: MemoryTier, record: &MemoryRecord) -> Result<()> {
        let start = Instant::now();
        let json =
            serde_json::to_vec(record).map_err(|e| MemoryError::Serialization(e.to_string()))?;
        let checksum = self.config.checksum_enabled.then(|| crc32_hex(&json));

        self.conn.lock().execute(
            "INSERT INTO memory_records (character_id, tier, id, data, created_at, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(character_id, tier, id) DO UPDATE SET
                data = excluded.data,
                checksum = excluded.checksum",
            params![
                record.character_id.as_str(),
                tier.as_str(),
                record.id.to_string(),
                json,
                record.created_at.to_rfc3339(),
                checksum
            ],
        )?;

        debug!(
            character = %record.character_id,
            tier = %tier,
            id = %record.id,
            bytes = json.len(),
            elapsed_us = start.elapsed().as_micros(),
            "stored record"
        );
        Ok(())
    }

    fn get(
        &self,
        character: &CharacterId,
        tier: MemoryTier,
        id: MemoryId,
    ) -> Result<Option<MemoryRecord>> {
        let id_str = id.to_string();
        let row: Option<(Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT data, checksum FROM memory_records
                 WHERE character_id = ?1 AND tier = ?2 AND id = ?3",
            )?;
            stmt.query_row(params![character.as_str(), tier.as_str(), id_str], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?
        };
        row.map(|(data, checksum)| self.decode(&data, checksum.as_deref(), &id_str))
            .transpose()
    }

    fn remove(&self, character: &CharacterId, tier: MemoryTier, id: MemoryId) -> Result<bool> {
        let deleted = self.conn.lock().execute(
            "DELETE FROM memory_records WHERE character_id = ?1 AND tier = ?2 AND id = ?3",
            params![character.as_str(), tier.as_str(), id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    fn list(&self, character: &CharacterId, tier: MemoryTier) -> Result<Vec<MemoryRecord>> {
        let rows: Vec<(String, Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT id, data, checksum FROM memory_records
                 WHERE character_id = ?1 AND tier = ?2",
            )?;
            let mapped = stmt.query_map(params![character.as_str(), tier.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        let mut records = Vec::with_capacity(rows.len());
        for (id, data, checksum) in rows {
            match self.decode(&data, checksum.as_deref(), &id) {
                Ok(record) => records.push(record),
                Err(e) => warn!(id = %id, error = %e, "skipping undecodable record"),
            }
        }
        Ok(records)
    }

    fn count(&self, character: &CharacterId, tier: MemoryTier) -> Result<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM memory_records WHERE character_id = ?1 AND tier = ?2",
            params![character.as_str(), tier.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn clear(&self, character: &CharacterId) -> Result<usize> {
        let deleted = self.conn.lock().execute(
            "DELETE FROM memory_records WHERE character_id = ?1",
            params![character.as_str()],
        )?;
        info!(character = %character, removed = deleted, "cleared character memories");
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
