use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_derive::Serialize;

use super::Storage;

#[derive(Debug, Clone, Serialize)]
pub struct PostRecord {
    pub id: String,
    pub content: String,
    pub external_id: Option<String>,
    pub status: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PostRecord {
    pub fn posted(content: &str, external_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            external_id: Some(external_id.to_string()),
            status: "posted".to_string(),
            posted_at: Some(now),
            created_at: now,
        }
    }

    pub fn dry_run(content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            external_id: None,
            status: "dry_run".to_string(),
            posted_at: None,
            created_at: Utc::now(),
        }
    }
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|t| t.with_timezone(&Utc))
            .ok()
    })
}

impl Storage {
    pub async fn record_post(&self, record: &PostRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO posts (id, content, external_id, status, posted_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.content,
                record.external_id,
                record.status,
                record.posted_at.map(|t| t.to_rfc3339()),
                record.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Newest-first page of posted items.
    pub async fn list_posts(&self, limit: usize, offset: usize) -> Result<Vec<PostRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, content, external_id, status, posted_at, created_at
             FROM posts ORDER BY posted_at DESC, created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut posts = Vec::new();
        for row in rows {
            let (id, content, external_id, status, posted_at, created_at) = row?;
            posts.push(PostRecord {
                id,
                content,
                external_id,
                status,
                posted_at: parse_ts(posted_at),
                created_at: parse_ts(Some(created_at)).unwrap_or_else(Utc::now),
            });
        }
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posts_paginate_newest_first() {
        let storage = Storage::open_in_memory().unwrap();
        for i in 0..5 {
            let mut record = PostRecord::posted(&format!("tweet {}", i), &format!("ext-{}", i));
            record.posted_at = Some(Utc::now() + chrono::Duration::seconds(i));
            storage.record_post(&record).await.unwrap();
        }

        let page = storage.list_posts(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "tweet 4");
        assert_eq!(page[1].content, "tweet 3");

        let next = storage.list_posts(2, 2).await.unwrap();
        assert_eq!(next[0].content, "tweet 2");
    }

    #[tokio::test]
    async fn dry_run_posts_have_no_external_id() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .record_post(&PostRecord::dry_run("would have posted this"))
            .await
            .unwrap();
        let posts = storage.list_posts(10, 0).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status, "dry_run");
        assert!(posts[0].external_id.is_none());
        assert!(posts[0].posted_at.is_none());
    }
}
