mod posts;
mod state;
mod tokens;

use anyhow::Result;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use posts::PostRecord;
pub use state::OAuthStateRecord;

use crate::core::workflow::WorkflowConfig;

/// Single-process persistence layer. One sqlite connection behind a mutex;
/// the mutex is what serializes conflicting writes across concurrent runs.
#[derive(Clone)]
pub struct Storage {
    pub(crate) db: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct WorkflowRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub user_id: String,
    pub config: WorkflowConfig,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path)?;
        Self::bootstrap(db)
    }

    /// In-memory database for tests and dry experiments.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::bootstrap(db)
    }

    fn bootstrap(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS user_credentials (
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                fields TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, platform)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS oauth_state (
                state TEXT PRIMARY KEY,
                code_verifier TEXT NOT NULL,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                external_id TEXT,
                status TEXT NOT NULL,
                posted_at TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_posts_posted_at ON posts(posted_at DESC)",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                user_id TEXT NOT NULL,
                config TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS api_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    // -- credentials (ciphertext only; encryption lives in the vault) --

    pub async fn put_credential_blob(
        &self,
        user_id: &str,
        platform: &str,
        ciphertext: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO user_credentials (user_id, platform, fields, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, platform) DO UPDATE SET
                fields = excluded.fields, updated_at = excluded.updated_at",
            params![
                user_id,
                platform,
                ciphertext,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub async fn get_credential_blob(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT fields FROM user_credentials WHERE user_id = ?1 AND platform = ?2")?;
        let mut rows = stmt.query(params![user_id, platform])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub async fn list_credential_platforms(&self, user_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT platform FROM user_credentials WHERE user_id = ?1 ORDER BY platform",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        let mut platforms = Vec::new();
        for row in rows {
            platforms.push(row?);
        }
        Ok(platforms)
    }

    pub async fn delete_credential(&self, user_id: &str, platform: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM user_credentials WHERE user_id = ?1 AND platform = ?2",
            params![user_id, platform],
        )?;
        Ok(rows > 0)
    }

    // -- app settings --

    pub async fn all_settings(&self) -> Result<Vec<(String, String)>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT key, value FROM app_settings")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO app_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // -- workflows --

    pub async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, description, user_id, config FROM workflows WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => {
                let config_json: String = row.get(4)?;
                Ok(Some(WorkflowRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    user_id: row.get(3)?,
                    config: serde_json::from_str(&config_json)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn upsert_workflow(&self, record: &WorkflowRecord) -> Result<()> {
        let config_json = serde_json::to_string(&record.config)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO workflows (id, name, description, user_id, config)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, description = excluded.description,
                user_id = excluded.user_id, config = excluded.config",
            params![
                record.id,
                record.name,
                record.description,
                record.user_id,
                config_json
            ],
        )?;
        Ok(())
    }
}
