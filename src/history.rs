//! Per-user search history.
//!
//! Each row remembers a title a user opened. A user has at most one row per
//! title: opening it again only refreshes `created_at`, so the most recent
//! interaction wins and the title moves to the top of the list.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

/// Number of rows the history endpoints return.
pub const RECENT_LIMIT: usize = 10;

/// Title details captured when a user opens a search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub movie_id: String,
    pub movie_title: String,
    #[serde(default)]
    pub movie_year: String,
    #[serde(default)]
    pub movie_poster: String,
}

/// A stored `search_history` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub user_id: String,
    pub movie_id: String,
    pub movie_title: String,
    pub movie_year: String,
    pub movie_poster: String,
    pub created_at: DateTime<Utc>,
}

pub trait HistoryStore: Send + Sync + 'static {
    /// Inserts the entry, or refreshes `created_at` if the user already has it.
    fn record(&self, user_id: &str, entry: &NewHistoryEntry, at: DateTime<Utc>) -> Result<()>;

    /// Newest first.
    fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Deletes every row belonging to the user. Returns the number removed.
    fn clear(&self, user_id: &str) -> Result<usize>;
}

/// SQLite-backed store. Opens a short-lived connection per call so it can be
/// cloned freely across blocking tasks.
#[derive(Debug, Clone)]
pub struct SqliteHistory {
    db_path: PathBuf,
}

impl SqliteHistory {
    /// Opens (and if necessary creates) the DB and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating history directory {}", parent.display()))?;
            }
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening history DB {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL mode for history DB")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("setting history DB synchronous mode")?;
        ensure_tables(&mut conn)?;

        Ok(Self {
            db_path: path.to_path_buf(),
        })
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("opening history DB {}", self.db_path.display()))?;
        f(&conn)
    }
}

fn ensure_tables(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            movie_id TEXT NOT NULL,
            movie_title TEXT NOT NULL,
            movie_year TEXT NOT NULL DEFAULT '',
            movie_poster TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            UNIQUE (user_id, movie_id)
        );

        CREATE INDEX IF NOT EXISTS idx_search_history_user_created
            ON search_history(user_id, created_at DESC);
        "#,
    )?;
    tx.commit()?;
    Ok(())
}

impl HistoryStore for SqliteHistory {
    fn record(&self, user_id: &str, entry: &NewHistoryEntry, at: DateTime<Utc>) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO search_history (
                    user_id, movie_id, movie_title, movie_year, movie_poster, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(user_id, movie_id) DO UPDATE SET
                    created_at = excluded.created_at
                "#,
                params![
                    user_id,
                    entry.movie_id,
                    entry.movie_title,
                    entry.movie_year,
                    entry.movie_poster,
                    at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )
            .with_context(|| format!("recording {} for {user_id}", entry.movie_id))?;
            Ok(())
        })
    }

    fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, user_id, movie_id, movie_title, movie_year, movie_poster, created_at
                FROM search_history
                WHERE user_id = ?1
                ORDER BY created_at DESC, id DESC
                LIMIT ?2
                "#,
            )?;

            let mut rows = stmt.query(params![user_id, limit as i64])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
    }

    fn clear(&self, user_id: &str) -> Result<usize> {
        self.with_connection(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM search_history WHERE user_id = ?1",
                    params![user_id],
                )
                .with_context(|| format!("clearing history for {user_id}"))?;
            Ok(removed)
        })
    }
}

fn row_to_entry(row: &Row<'_>) -> Result<HistoryEntry> {
    let created_at: String = row.get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .with_context(|| format!("parsing stored created_at {created_at:?}"))?
        .with_timezone(&Utc);

    Ok(HistoryEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        movie_id: row.get("movie_id")?,
        movie_title: row.get("movie_title")?,
        movie_year: row.get("movie_year")?,
        movie_poster: row.get("movie_poster")?,
        created_at,
    })
}
