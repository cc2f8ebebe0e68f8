//! SQLite-backed credential store.

use crate::{ensure_parent_dir, CredentialStore, StoreError, StoreResult, UserSnapshot};
use attend_core::{Embedding, UserRecord};
use chrono::{DateTime, Local};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,
    password_hash TEXT NOT NULL,
    domain        TEXT NOT NULL,
    embedding     TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
";

/// Raw column values, decoded outside the connection thread.
type UserRow = (String, String, String, String, String);

const SELECT_USER: &str = "SELECT id, password_hash, domain, embedding, created_at FROM users";

#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Connection,
}

impl SqliteCredentialStore {
    /// Open (creating if needed) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let conn = Connection::open(path).await?;
        conn.call(|c| {
            c.busy_timeout(Duration::from_secs(5))?;
            let _mode: String = c.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
            Ok(())
        })
        .await?;
        tracing::debug!(path = %path.display(), "credential store opened");
        Self::init(conn).await
    }

    /// A private, non-persistent store.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> StoreResult<Self> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(row: UserRow) -> StoreResult<UserRecord> {
    let (id, password_hash, domain, embedding, created_at) = row;

    let embedding: Embedding = serde_json::from_str(&embedding).map_err(|e| StoreError::Corrupt {
        key: id.clone(),
        reason: format!("embedding: {e}"),
    })?;
    if embedding.is_empty() {
        return Err(StoreError::Corrupt {
            key: id,
            reason: "empty embedding".into(),
        });
    }
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt {
            key: id.clone(),
            reason: format!("created_at: {e}"),
        })?
        .with_timezone(&Local);

    Ok(UserRecord {
        id,
        password_hash,
        domain,
        embedding,
        created_at,
    })
}

fn encode(record: &UserRecord) -> StoreResult<UserRow> {
    let embedding = serde_json::to_string(&record.embedding).map_err(|e| StoreError::Corrupt {
        key: record.id.clone(),
        reason: format!("embedding: {e}"),
    })?;
    Ok((
        record.id.clone(),
        record.password_hash.clone(),
        record.domain.clone(),
        embedding,
        record.created_at.to_rfc3339(),
    ))
}

const INSERT_USER: &str = "INSERT INTO users (id, password_hash, domain, embedding, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(id) DO NOTHING";

impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> StoreResult<UserSnapshot> {
        let rows = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(&format!("{SELECT_USER} ORDER BY id"))?;
                let rows = stmt
                    .query_map([], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|row| decode(row).map(|u| (u.id.clone(), u)))
            .collect()
    }

    async fn save(&self, users: &UserSnapshot) -> StoreResult<()> {
        let rows = users.values().map(encode).collect::<StoreResult<Vec<_>>>()?;
        let count = rows.len();
        self.conn
            .call(move |c| {
                let tx = c.transaction()?;
                tx.execute("DELETE FROM users", [])?;
                {
                    let mut stmt = tx.prepare(INSERT_USER)?;
                    for (id, hash, domain, embedding, created_at) in &rows {
                        stmt.execute(params![id, hash, domain, embedding, created_at])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        tracing::debug!(users = count, "credential snapshot written");
        Ok(())
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        let found = self
            .conn
            .call(move |c| {
                let found: bool = c.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                    params![id],
                    |r| r.get(0),
                )?;
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |c| {
                let row = c
                    .query_row(&format!("{SELECT_USER} WHERE id = ?1"), params![id], read_row)
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(decode).transpose()
    }

    async fn create(&self, record: &UserRecord) -> StoreResult<()> {
        if !record.embedding.is_well_formed() {
            return Err(StoreError::Corrupt {
                key: record.id.clone(),
                reason: "refusing to store an incomplete embedding".into(),
            });
        }
        let (id, hash, domain, embedding, created_at) = encode(record)?;
        let key = id.clone();
        let inserted = self
            .conn
            .call(move |c| {
                let n = c.execute(INSERT_USER, params![id, hash, domain, embedding, created_at])?;
                Ok(n)
            })
            .await?;

        if inserted == 0 {
            return Err(StoreError::DuplicateId(key));
        }
        tracing::debug!(id = %key, "user record created");
        Ok(())
    }

    async fn count(&self) -> StoreResult<usize> {
        let n = self
            .conn
            .call(|c| {
                let n: i64 = c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(id: &str, fill: f32) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            password_hash: "$argon2id$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaA".to_string(),
            domain: "eng".to_string(),
            embedding: Embedding::new(vec![fill; 128]),
            created_at: Local.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).single().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_get_exists() {
        let store = SqliteCredentialStore::open_in_memory().await.unwrap();
        assert!(!store.exists("alice").await.unwrap());

        store.create(&user("alice", 0.25)).await.unwrap();

        assert!(store.exists("alice").await.unwrap());
        let got = store.get("alice").await.unwrap().unwrap();
        assert_eq!(got, user("alice", 0.25));
        assert!(store.get("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = SqliteCredentialStore::open_in_memory().await.unwrap();
        store.create(&user("alice", 0.1)).await.unwrap();

        let err = store.create(&user("alice", 0.9)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(ref id) if id == "alice"));

        // Original record is untouched.
        let got = store.get("alice").await.unwrap().unwrap();
        assert_eq!(got.embedding.values[0], 0.1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_same_id_admit_one() {
        let store = SqliteCredentialStore::open_in_memory().await.unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(&user("carol", i as f32 / 10.0)).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_distinct_ids_all_survive() {
        let store = SqliteCredentialStore::open_in_memory().await.unwrap();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(&user(&format!("user{i}"), 0.5)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.load().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_load_and_save_snapshot() {
        let store = SqliteCredentialStore::open_in_memory().await.unwrap();
        store.create(&user("alice", 0.1)).await.unwrap();
        store.create(&user("bob", 0.2)).await.unwrap();

        let mut snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["alice", "bob"]);

        snapshot.remove("alice");
        snapshot.insert("dave".into(), user("dave", 0.4));
        store.save(&snapshot).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded, snapshot);
        assert!(!store.exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_incomplete_embedding_never_stored() {
        let store = SqliteCredentialStore::open_in_memory().await.unwrap();
        let mut bad = user("eve", 0.0);
        bad.embedding = Embedding::new(vec![]);
        assert!(matches!(store.create(&bad).await, Err(StoreError::Corrupt { .. })));
        assert!(!store.exists("eve").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users.db");

        {
            let store = SqliteCredentialStore::open(&path).await.unwrap();
            store.create(&user("alice", 0.3)).await.unwrap();
        }
        let store = SqliteCredentialStore::open(&path).await.unwrap();
        assert_eq!(store.get("alice").await.unwrap().unwrap(), user("alice", 0.3));
    }
}
