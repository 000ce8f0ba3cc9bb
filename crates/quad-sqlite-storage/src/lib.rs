//! SQLite-based offline queue for the Quad messaging core.
//!
//! Messages composed while the network is down are written to a single table and
//! survive process restarts. Items are returned in enqueue order (an
//! autoincrement sequence column), and removal is keyed by the message's local
//! id.
//!
//! ```no_run
//! use quad_sqlite_storage::SqliteOfflineQueue;
//!
//! let queue = SqliteOfflineQueue::open("/path/to/offline_queue.sqlite3")?;
//! # Ok::<(), quad_sqlite_storage::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::path::Path;
use std::sync::Mutex;

use quad_storage_traits::{OfflineQueueError, OfflineQueueStorage, QueuedMessage};
use rusqlite::{Connection, params};

pub mod error;

use self::error::Error;

/// A SQLite-backed [`OfflineQueueStorage`].
///
/// One connection guarded by a mutex; every append and removal is serialized
/// through it.
pub struct SqliteOfflineQueue {
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteOfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteOfflineQueue").finish_non_exhaustive()
    }
}

impl SqliteOfflineQueue {
    /// Open (or create) the queue database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a queue that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS offline_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                local_id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                content TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_display_name TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            connection: Mutex::new(conn),
        })
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Connection) -> Result<T, Error>,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|_| Error::Database("offline queue lock poisoned".to_string()))?;
        f(&conn)
    }
}

impl OfflineQueueStorage for SqliteOfflineQueue {
    fn append(&self, message: QueuedMessage) -> Result<(), OfflineQueueError> {
        self.with_connection(|conn| {
            let inserted = conn.execute(
                "INSERT INTO offline_queue
                 (local_id, conversation_id, content, sender_id, sender_display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(local_id) DO NOTHING",
                params![
                    message.local_id,
                    message.conversation_id,
                    message.content,
                    message.sender_id,
                    message.sender_display_name,
                    message.created_at,
                ],
            )?;
            Ok(inserted)
        })
        .map_err(OfflineQueueError::from)
        .and_then(|inserted| {
            if inserted == 0 {
                return Err(OfflineQueueError::Duplicate(message.local_id.clone()));
            }
            tracing::debug!(local_id = %message.local_id, "offline queue append");
            Ok(())
        })
    }

    fn list(&self) -> Result<Vec<QueuedMessage>, OfflineQueueError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT local_id, conversation_id, content, sender_id, sender_display_name, created_at
                 FROM offline_queue
                 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(QueuedMessage {
                    local_id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    content: row.get(2)?,
                    sender_id: row.get(3)?,
                    sender_display_name: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            let mut items = Vec::new();
            for row in rows {
                items.push(row?);
            }
            Ok(items)
        })
        .map_err(OfflineQueueError::from)
    }

    fn remove(&self, local_id: &str) -> Result<bool, OfflineQueueError> {
        self.with_connection(|conn| {
            let removed = conn.execute(
                "DELETE FROM offline_queue WHERE local_id = ?1",
                params![local_id],
            )?;
            Ok(removed > 0)
        })
        .map_err(OfflineQueueError::from)
    }

    fn len(&self) -> Result<usize, OfflineQueueError> {
        self.with_connection(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM offline_queue", [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        })
        .map_err(OfflineQueueError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(local_id: &str, created_at: i64) -> QueuedMessage {
        QueuedMessage {
            local_id: local_id.to_string(),
            conversation_id: "c1".to_string(),
            content: format!("body {local_id}"),
            sender_id: "u1".to_string(),
            sender_display_name: "Ada".to_string(),
            created_at,
        }
    }

    #[test]
    fn items_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");
        {
            let q = SqliteOfflineQueue::open(&path).unwrap();
            q.append(queued("a", 1)).unwrap();
            q.append(queued("b", 2)).unwrap();
        }
        let q = SqliteOfflineQueue::open(&path).unwrap();
        let items = q.list().unwrap();
        assert_eq!(items, vec![queued("a", 1), queued("b", 2)]);
    }

    #[test]
    fn order_is_enqueue_order_not_timestamp_order() {
        let q = SqliteOfflineQueue::open_in_memory().unwrap();
        q.append(queued("late", 50)).unwrap();
        q.append(queued("early", 10)).unwrap();
        let ids: Vec<_> = q.list().unwrap().into_iter().map(|m| m.local_id).collect();
        assert_eq!(ids, vec!["late", "early"]);
    }

    #[test]
    fn remove_reports_whether_anything_was_deleted() {
        let q = SqliteOfflineQueue::open_in_memory().unwrap();
        q.append(queued("a", 1)).unwrap();
        assert!(q.remove("a").unwrap());
        assert!(!q.remove("a").unwrap());
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn duplicate_local_id_is_rejected() {
        let q = SqliteOfflineQueue::open_in_memory().unwrap();
        q.append(queued("a", 1)).unwrap();
        assert!(matches!(
            q.append(queued("a", 2)),
            Err(OfflineQueueError::Duplicate(id)) if id == "a"
        ));
        assert_eq!(q.len().unwrap(), 1);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.sqlite3");
        let q = SqliteOfflineQueue::open(&path).unwrap();
        q.append(queued("a", 1)).unwrap();
        assert!(path.exists());
    }
}
