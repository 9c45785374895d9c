//! Saved notes: a local SQLite store with a change stream.
//!
//! One table, `saved_notes`, listed newest first. Every mutation re-reads the
//! list and publishes it on a `watch` channel, so a gallery view can follow
//! [`NoteStore::watch`] instead of polling. Writes from other processes are
//! detected through `PRAGMA data_version`.

use crate::error::StudyError;
use chrono::{Local, TimeZone};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i64 = 1;

/// A saved explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedNote {
    pub id: i64,
    pub title: String,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Language name the content was written in, e.g. "English".
    pub language: String,
}

impl SavedNote {
    /// Local time as `MMM dd, yyyy • hh:mm a`, e.g. `Mar 04, 2025 • 09:15 PM`.
    pub fn display_date(&self) -> String {
        match Local.timestamp_millis_opt(self.timestamp).single() {
            Some(t) => t.format("%b %d, %Y • %I:%M %p").to_string(),
            None => String::from("Unknown date"),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SavedNote {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            timestamp: row.get(3)?,
            language: row.get(4)?,
        })
    }
}

/// Fields of a note that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub timestamp: i64,
    pub language: String,
}

/// SQLite-backed note store. Every change, from this handle or from another
/// connection to the same file, is published to [`NoteStore::watch`].
pub struct NoteStore {
    shared: Arc<Shared>,
}

struct Shared {
    conn: Mutex<Connection>,
    changes: watch::Sender<Vec<SavedNote>>,
    /// Last `PRAGMA data_version` seen; moves when another connection commits.
    data_version: AtomicI64,
    polling: AtomicBool,
}

impl std::fmt::Debug for NoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteStore")
            .field("notes", &self.shared.changes.borrow().len())
            .finish()
    }
}

impl NoteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StudyError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StudyError::Database(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        info!("Note store opened: {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StudyError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StudyError> {
        init_schema(&conn)?;
        let initial = query_all(&conn)?;
        let version = data_version(&conn)?;
        let (changes, _) = watch::channel(initial);
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                changes,
                data_version: AtomicI64::new(version),
                polling: AtomicBool::new(false),
            }),
        })
    }

    /// Store a note and return its id.
    pub fn insert(&self, note: &NewNote) -> Result<i64, StudyError> {
        let id = {
            let conn = self.shared.lock()?;
            conn.execute(
                "INSERT INTO saved_notes (title, content, timestamp, language) VALUES (?1, ?2, ?3, ?4)",
                params![note.title, note.content, note.timestamp, note.language],
            )?;
            let id = conn.last_insert_rowid();
            self.shared.publish(&conn)?;
            id
        };
        debug!("Saved note {id}: {}", note.title);
        Ok(id)
    }

    /// All notes, newest first.
    pub fn get_all(&self) -> Result<Vec<SavedNote>, StudyError> {
        query_all(&*self.shared.lock()?)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<SavedNote>, StudyError> {
        let conn = self.shared.lock()?;
        let note = conn
            .query_row(
                "SELECT id, title, content, timestamp, language FROM saved_notes WHERE id = ?1",
                params![id],
                SavedNote::from_row,
            )
            .optional()?;
        Ok(note)
    }

    pub fn delete(&self, note: &SavedNote) -> Result<(), StudyError> {
        self.delete_by_id(note.id)
    }

    /// Fails with [`StudyError::NoteNotFound`] when no note has `id`.
    pub fn delete_by_id(&self, id: i64) -> Result<(), StudyError> {
        let conn = self.shared.lock()?;
        let removed = conn.execute("DELETE FROM saved_notes WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StudyError::NoteNotFound { id });
        }
        self.shared.publish(&conn)?;
        debug!("Deleted note {id}");
        Ok(())
    }

    /// Pick up commits made by other connections to the same database.
    /// Returns `true` when the published list changed.
    pub fn refresh(&self) -> Result<bool, StudyError> {
        self.shared.refresh()
    }

    /// The full list, re-emitted after every change. Yields the current list
    /// first.
    ///
    /// Inside a Tokio runtime this also starts a background poll (every
    /// [`WATCH_POLL_INTERVAL`]) so changes written by other processes show
    /// up too. The poll stops once every stream and the store are dropped.
    pub fn watch(&self) -> WatchStream<Vec<SavedNote>> {
        let rx = self.shared.changes.subscribe();
        if tokio::runtime::Handle::try_current().is_ok() {
            self.spawn_poller();
        }
        WatchStream::new(rx)
    }

    fn spawn_poller(&self) {
        if self.shared.polling.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCH_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if shared.changes.receiver_count() == 0 || Arc::strong_count(&shared) == 1 {
                    break;
                }
                if let Err(e) = shared.refresh() {
                    warn!("Note store poll failed: {e}");
                }
            }
            shared.polling.store(false, Ordering::SeqCst);
            debug!("Note store poll stopped");
        });
    }
}

/// How often [`NoteStore::watch`] checks for changes from other connections.
pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StudyError> {
        self.conn
            .lock()
            .map_err(|e| StudyError::Database(format!("note store lock poisoned: {e}")))
    }

    fn publish(&self, conn: &Connection) -> Result<(), StudyError> {
        let notes = query_all(conn)?;
        self.changes.send_replace(notes);
        Ok(())
    }

    fn refresh(&self) -> Result<bool, StudyError> {
        let conn = self.lock()?;
        let version = data_version(&conn)?;
        if self.data_version.swap(version, Ordering::SeqCst) == version {
            return Ok(false);
        }
        let notes = query_all(&conn)?;
        let changed = self.changes.send_if_modified(|current| {
            if *current == notes {
                false
            } else {
                *current = notes;
                true
            }
        });
        if changed {
            debug!("Note store changed by another connection");
        }
        Ok(changed)
    }
}

fn data_version(conn: &Connection) -> Result<i64, StudyError> {
    Ok(conn.query_row("PRAGMA data_version", [], |row| row.get(0))?)
}

fn init_schema(conn: &Connection) -> Result<(), StudyError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS saved_notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            language TEXT NOT NULL DEFAULT 'English'
        );
        CREATE INDEX IF NOT EXISTS idx_saved_notes_timestamp ON saved_notes(timestamp DESC);",
    )?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    }
    Ok(())
}

fn query_all(conn: &Connection) -> Result<Vec<SavedNote>, StudyError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, timestamp, language FROM saved_notes
         ORDER BY timestamp DESC, id DESC",
    )?;
    let notes = stmt
        .query_map([], SavedNote::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notes)
}
