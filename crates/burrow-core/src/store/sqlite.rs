//! SQLite-backed mapping store.

use super::MappingStore;
use crate::config::StoreConfig;
use crate::error::{BurrowError, Result};
use crate::models::TunnelMapping;
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Mapping store on a single SQLite connection.
///
/// Uses WAL mode so an admin tool can read the file while the daemon runs,
/// and `Arc<Mutex<Connection>>` for thread safety within a process.
#[derive(Clone)]
pub struct SqliteMappingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMappingStore {
    /// Open the store at a specific path.
    ///
    /// Creates the database and parent directories if they don't exist.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BurrowError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;",
            StoreConfig::BUSY_TIMEOUT_MS,
        ))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tunnel_mappings (
                target_port INTEGER PRIMARY KEY CHECK (target_port BETWEEN 1 AND 65535),
                tunnel_port INTEGER NOT NULL DEFAULT 0 CHECK (tunnel_port BETWEEN 0 AND 65535)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_tunnel_mappings_tunnel_port
                ON tunnel_mappings (tunnel_port) WHERE tunnel_port <> 0;",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| BurrowError::Store {
            message: "Failed to acquire store connection lock".to_string(),
            source: None,
        })
    }

    /// Add a target with its tunnel disabled. Idempotent.
    pub fn register_target(&self, target_port: u16) -> Result<bool> {
        if target_port == 0 {
            return Err(BurrowError::Validation {
                field: "target_port".into(),
                message: "must be greater than zero".into(),
            });
        }
        let conn = self.lock_conn()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO tunnel_mappings (target_port, tunnel_port) VALUES (?1, 0)",
            params![target_port],
        )?;
        debug!("register_target({}): {} row(s)", target_port, rows);
        Ok(rows > 0)
    }

    /// Remove a target. Returns whether it existed.
    pub fn remove_target(&self, target_port: u16) -> Result<bool> {
        let conn = self.lock_conn()?;
        let rows = conn.execute(
            "DELETE FROM tunnel_mappings WHERE target_port = ?1",
            params![target_port],
        )?;
        Ok(rows > 0)
    }

    fn read_all(&self) -> Result<Vec<TunnelMapping>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_port, tunnel_port FROM tunnel_mappings ORDER BY target_port",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TunnelMapping {
                target_port: row.get(0)?,
                tunnel_port: row.get(1)?,
            })
        })?;
        let mappings = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    fn write_tunnel_port(&self, target_port: u16, tunnel_port: u16) -> Result<usize> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE tunnel_mappings SET tunnel_port = ?1 WHERE target_port = ?2",
            params![tunnel_port, target_port],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                BurrowError::TunnelPortConflict { tunnel_port }
            }
            other => BurrowError::from(other),
        })
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteMappingStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| BurrowError::Store {
                message: format!("store task failed: {}", e),
                source: None,
            })?
    }
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn get(&self) -> Result<Vec<TunnelMapping>> {
        self.blocking(|store| store.read_all()).await
    }

    async fn update(&self, target_port: u16, tunnel_port: u16) -> Result<usize> {
        self.blocking(move |store| store.write_tunnel_port(target_port, tunnel_port))
            .await
    }

    async fn remove(&self, target_port: u16) -> Result<bool> {
        self.blocking(move |store| store.remove_target(target_port))
            .await
    }
}
