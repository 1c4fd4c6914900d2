use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use log::{debug, trace};
use rusqlite::{OptionalExtension, Row};

use super::Database;
use crate::{
    clock::{Clock, SystemClock},
    context::Context,
    error::{Error, Result, StoreError},
};

pub type Id = i64;

/// Hard cap on [`SnippetStore::latest`].
pub const LATEST_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Snippet {
    pub id: Id,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl Snippet {
    fn from_row(row: &Row) -> rusqlite::Result<Snippet> {
        Ok(Snippet {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            created: Database::get_timestamp_column(row, 3)?,
            expires: Database::get_timestamp_column(row, 4)?,
        })
    }
}

/// Snippets with an expiry. A snippet is only readable while `expires > now`.
#[derive(Clone)]
pub struct SnippetStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SnippetStore {
    pub fn new(db: Database) -> SnippetStore {
        SnippetStore::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> SnippetStore {
        SnippetStore { db, clock }
    }

    /// Store a snippet that stays visible for `expires_in_days` days from now.
    /// Title and content are stored as given.
    pub fn insert(
        &self,
        ctx: &Context,
        title: &str,
        content: &str,
        expires_in_days: u32,
    ) -> Result<Id> {
        let created = self.now();
        let expires = created
            .checked_add_signed(Duration::days(i64::from(expires_in_days)))
            .ok_or(StoreError::ExpiryOutOfRange(expires_in_days))?;

        debug!("Adding snippet expiring in {} days", expires_in_days);

        let id = self.db.with_conn(ctx, |conn| {
            conn.query_row(
                "INSERT INTO snippets (title, content, created, expires)
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                (
                    title,
                    content,
                    created.timestamp_millis(),
                    expires.timestamp_millis(),
                ),
                |row| row.get(0),
            )
        })?;

        debug!("Added snippet {}", id);
        Ok(id)
    }

    /// Fetch a snippet. Expired and missing snippets both come back as [`Error::NoRecord`].
    pub fn get(&self, ctx: &Context, id: Id) -> Result<Snippet> {
        debug!("Getting snippet {}", id);
        let now = self.now().timestamp_millis();

        self.db
            .with_conn(ctx, |conn| {
                conn.query_row(
                    "SELECT id, title, content, created, expires FROM snippets
                     WHERE expires > ?1 AND id = ?2",
                    (now, id),
                    Snippet::from_row,
                )
                .optional()
            })?
            .ok_or(Error::NoRecord)
    }

    /// Up to [`LATEST_LIMIT`] visible snippets, newest first.
    pub fn latest(&self, ctx: &Context) -> Result<Vec<Snippet>> {
        trace!("Getting latest snippets");
        let now = self.now().timestamp_millis();

        let snippets = self.db.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, title, content, created, expires FROM snippets
                 WHERE expires > ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let snippets = stmt
                .query_map((now, LATEST_LIMIT as i64), Snippet::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>();
            snippets
        })?;

        trace!("Got {} snippets", snippets.len());
        Ok(snippets)
    }

    /// Current time at the precision the table stores.
    fn now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now)
    }
}
