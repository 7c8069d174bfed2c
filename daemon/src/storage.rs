//! `SQLite` catalog for service definitions and observed status
//!
//! Stores the full service catalog persistently in `$HOME/.rigel/rigel.db`.
//! All statements run on the blocking thread pool behind a shared
//! connection; mutations are row-atomic (partial status updates run inside
//! one transaction).

use async_trait::async_trait;
use rigel_core::{CatalogRepository, CoreError};
use rusqlite::{params, Connection, OptionalExtension};
use schema::{
    EnvironmentTag, ServiceDefinition, ServiceStatus, ServiceType, StatusUpdate,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// SQLite-backed implementation of the catalog repository contract
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCatalog").finish()
    }
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS services (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    service_type TEXT NOT NULL DEFAULT 'other',
    path TEXT NOT NULL,
    command TEXT NOT NULL DEFAULT '',
    args TEXT NOT NULL DEFAULT '',
    working_dir TEXT NOT NULL DEFAULT '',
    port INTEGER NOT NULL DEFAULT 0,
    env_file TEXT NOT NULL DEFAULT '',
    env_vars TEXT NOT NULL DEFAULT '',
    environment TEXT NOT NULL DEFAULT 'development',
    status TEXT NOT NULL DEFAULT 'stopped',
    pid INTEGER NOT NULL DEFAULT 0,
    start_time INTEGER,
    stop_time INTEGER,
    last_error TEXT NOT NULL DEFAULT '',
    auto_restart INTEGER NOT NULL DEFAULT 0,
    max_restarts INTEGER NOT NULL DEFAULT 0,
    logs TEXT NOT NULL DEFAULT '[]',
    updated_at INTEGER NOT NULL
);
";

const ALL_COLUMNS: &str = "id, name, description, service_type, path, command, args, \
     working_dir, port, env_file, env_vars, environment, status, pid, \
     start_time, stop_time, last_error, auto_restart, max_restarts, logs";

impl SqliteCatalog {
    /// Open or create the database at `$HOME/.rigel/rigel.db`.
    ///
    /// # Errors
    /// Fails when HOME is unset or the directory/schema cannot be created.
    pub fn open_default() -> anyhow::Result<Self> {
        let base = std::env::var("HOME").map(PathBuf::from).map_err(|_| {
            anyhow::anyhow!("HOME must be set to open default database at $HOME/.rigel/rigel.db")
        })?;
        let dir = base.join(".rigel");
        std::fs::create_dir_all(&dir)?;
        Self::open_at(dir.join("rigel.db"))
    }

    /// Open or create a database at an explicit path
    ///
    /// # Errors
    /// Fails when the file cannot be opened or the schema cannot be created.
    pub fn open_at(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        // WAL improves concurrency and durability; fall back silently
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(
                "Failed to enable WAL journal mode: {}. Using default rollback journal.",
                e
            );
        }
        Self::with_connection(conn)
    }

    /// Open a transient in-memory database (tests)
    ///
    /// # Errors
    /// Fails when the schema cannot be created.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<T, F>(&self, op: F) -> rigel_core::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            op(&mut conn).map_err(repo_err)
        })
        .await
        .map_err(repo_err)?
    }
}

fn repo_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::Repository(e.to_string())
}

fn row_to_definition(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServiceDefinition> {
    let service_type: String = row.get("service_type")?;
    let environment: String = row.get("environment")?;
    let status: String = row.get("status")?;
    let logs_json: String = row.get("logs")?;

    Ok(ServiceDefinition {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        service_type: ServiceType::parse(&service_type),
        path: row.get("path")?,
        command: row.get("command")?,
        args: row.get("args")?,
        working_dir: row.get("working_dir")?,
        port: row.get("port")?,
        env_file: row.get("env_file")?,
        env_vars: row.get("env_vars")?,
        environment: EnvironmentTag::parse(&environment),
        status: ServiceStatus::parse(&status),
        pid: row.get("pid")?,
        start_time: row.get("start_time")?,
        stop_time: row.get("stop_time")?,
        last_error: row.get("last_error")?,
        auto_restart: row.get("auto_restart")?,
        max_restarts: row.get("max_restarts")?,
        logs: serde_json::from_str(&logs_json).unwrap_or_default(),
    })
}

#[async_trait]
impl CatalogRepository for SqliteCatalog {
    async fn load(&self, id: &str) -> rigel_core::Result<ServiceDefinition> {
        let id = id.to_string();
        let found = self
            .run_blocking({
                let id = id.clone();
                move |conn| {
                    conn.query_row(
                        &format!("SELECT {ALL_COLUMNS} FROM services WHERE id=?1"),
                        params![id],
                        row_to_definition,
                    )
                    .optional()
                }
            })
            .await?;

        found.ok_or(CoreError::NotFound(id))
    }

    async fn list(&self) -> rigel_core::Result<Vec<ServiceDefinition>> {
        self.run_blocking(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {ALL_COLUMNS} FROM services ORDER BY id"))?;
            let rows = stmt.query_map([], row_to_definition)?;
            rows.collect()
        })
        .await
    }

    async fn upsert(&self, def: &ServiceDefinition) -> rigel_core::Result<()> {
        let def = def.clone();
        self.run_blocking(move |conn| {
            let logs_json = serde_json::to_string(&def.logs).unwrap_or_else(|_| "[]".to_string());
            conn.execute(
                r"
                INSERT INTO services (
                    id, name, description, service_type, path, command, args,
                    working_dir, port, env_file, env_vars, environment, status,
                    pid, start_time, stop_time, last_error, auto_restart,
                    max_restarts, logs, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                        ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
                ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name,
                    description=excluded.description,
                    service_type=excluded.service_type,
                    path=excluded.path,
                    command=excluded.command,
                    args=excluded.args,
                    working_dir=excluded.working_dir,
                    port=excluded.port,
                    env_file=excluded.env_file,
                    env_vars=excluded.env_vars,
                    environment=excluded.environment,
                    status=excluded.status,
                    pid=excluded.pid,
                    start_time=excluded.start_time,
                    stop_time=excluded.stop_time,
                    last_error=excluded.last_error,
                    auto_restart=excluded.auto_restart,
                    max_restarts=excluded.max_restarts,
                    logs=excluded.logs,
                    updated_at=excluded.updated_at
                ",
                params![
                    def.id,
                    def.name,
                    def.description,
                    def.service_type.as_str(),
                    def.path,
                    def.command,
                    def.args,
                    def.working_dir,
                    def.port,
                    def.env_file,
                    def.env_vars,
                    def.environment.as_str(),
                    def.status.as_str(),
                    def.pid,
                    def.start_time,
                    def.stop_time,
                    def.last_error,
                    def.auto_restart,
                    def.max_restarts,
                    logs_json,
                    now_ts(),
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, id: &str) -> rigel_core::Result<()> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM services WHERE id=?1", params![id])
                .map(|_| ())
        })
        .await
    }

    async fn update_status(&self, id: &str, update: StatusUpdate) -> rigel_core::Result<()> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let ts = now_ts();
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE services SET status=?1, updated_at=?2 WHERE id=?3",
                params![update.status.as_str(), ts, id],
            )?;
            if let Some(pid) = update.pid {
                tx.execute("UPDATE services SET pid=?1 WHERE id=?2", params![pid, id])?;
            }
            if let Some(start_time) = update.start_time {
                tx.execute(
                    "UPDATE services SET start_time=?1 WHERE id=?2",
                    params![start_time, id],
                )?;
            }
            if let Some(stop_time) = update.stop_time {
                tx.execute(
                    "UPDATE services SET stop_time=?1 WHERE id=?2",
                    params![stop_time, id],
                )?;
            }
            if let Some(last_error) = update.last_error {
                tx.execute(
                    "UPDATE services SET last_error=?1 WHERE id=?2",
                    params![last_error, id],
                )?;
            }
            tx.commit()
        })
        .await
    }

    async fn update_logs(&self, id: &str, logs: Vec<String>) -> rigel_core::Result<()> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let logs_json = serde_json::to_string(&logs).unwrap_or_else(|_| "[]".to_string());
            conn.execute(
                "UPDATE services SET logs=?1, updated_at=?2 WHERE id=?3",
                params![logs_json, now_ts(), id],
            )
            .map(|_| ())
        })
        .await
    }
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
