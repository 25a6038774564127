use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Storage;

#[derive(Debug, Clone)]
pub struct OAuthStateRecord {
    pub state: String,
    pub code_verifier: String,
    pub user_id: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn insert_oauth_state(&self, record: &OAuthStateRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO oauth_state (state, code_verifier, user_id, provider, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.state,
                record.code_verifier,
                record.user_id,
                record.provider,
                record.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Fetch and delete an oauth_state row in one critical section. A state
    /// value can only ever be consumed once; a second call returns `None`.
    pub async fn consume_oauth_state(&self, state: &str) -> Result<Option<OAuthStateRecord>> {
        let db = self.db.lock().await;
        let record = {
            let mut stmt = db.prepare(
                "SELECT state, code_verifier, user_id, provider, created_at
                 FROM oauth_state WHERE state = ?1",
            )?;
            let mut rows = stmt.query(params![state])?;
            match rows.next()? {
                Some(row) => {
                    let created_at: String = row.get(4)?;
                    Some(OAuthStateRecord {
                        state: row.get(0)?,
                        code_verifier: row.get(1)?,
                        user_id: row.get(2)?,
                        provider: row.get(3)?,
                        created_at: DateTime::parse_from_rfc3339(&created_at)
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                }
                None => None,
            }
        };

        if record.is_some() {
            db.execute("DELETE FROM oauth_state WHERE state = ?1", params![state])?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: &str) -> OAuthStateRecord {
        OAuthStateRecord {
            state: state.to_string(),
            code_verifier: "verifier-123".to_string(),
            user_id: "u1".to_string(),
            provider: "twitter".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn oauth_state_is_single_use() {
        let storage = Storage::open_in_memory().unwrap();
        storage.insert_oauth_state(&record("abc")).await.unwrap();

        let first = storage.consume_oauth_state("abc").await.unwrap();
        assert_eq!(first.unwrap().code_verifier, "verifier-123");

        // Replay: the row is gone.
        assert!(storage.consume_oauth_state("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.consume_oauth_state("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_authorize_starts_keep_separate_rows() {
        let storage = Storage::open_in_memory().unwrap();
        storage.insert_oauth_state(&record("s1")).await.unwrap();
        storage.insert_oauth_state(&record("s2")).await.unwrap();

        assert!(storage.consume_oauth_state("s1").await.unwrap().is_some());
        assert!(storage.consume_oauth_state("s2").await.unwrap().is_some());
    }
}
