use std::{
    panic::AssertUnwindSafe,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, Row};

use crate::{config::DatabaseConfig, context::Context, error::StoreError};

/// SQLite VM instructions between cancellation checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// Longest single wait on the pool before the context is checked again.
const ACQUIRE_SLICE: Duration = Duration::from_millis(25);

/// Pooled handle to the backing SQLite database.
///
/// Cloning is cheap and shares the pool. Connections are closed once the last
/// handle is dropped or [`Database::close`]d.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    connection_timeout: Duration,
}

/// Build the database.
impl Database {
    pub fn open(config: &DatabaseConfig) -> Result<Database, StoreError> {
        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)?;

        trace!("Opened database pool ({} connections)", config.pool_size);

        let db = Database {
            pool,
            connection_timeout: config.connection_timeout,
        };
        db.init_db()?;

        info!("Database opened at {}", config.path.display());
        Ok(db)
    }

    fn init_db(&self) -> Result<(), StoreError> {
        trace!("Initializing database...");

        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snippets (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                title   TEXT NOT NULL,
                content TEXT NOT NULL,
                created INTEGER NOT NULL,
                expires INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snippets_expires ON snippets(expires);

            CREATE TABLE IF NOT EXISTS users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL,
                email           TEXT NOT NULL,
                hashed_password TEXT NOT NULL,
                created         INTEGER NOT NULL,
                CONSTRAINT users_uc_email UNIQUE (email)
            );",
        )?;

        info!("Finished initializing database");
        Ok(())
    }

    /// Drop this handle. The pool and its connections are only closed once every
    /// clone, including those held by the stores, has been dropped.
    pub fn close(self) {
        debug!("Closing database pool");
    }

    /// Run `f` on a pooled connection, bounded by `ctx`.
    ///
    /// The wait for a connection is capped by whatever time `ctx` has left and ends early
    /// if `ctx` is cancelled. While `f`
    /// runs, SQLite polls `ctx` and interrupts the statement once it is cancelled or
    /// past its deadline. The connection goes back to the pool on every exit path.
    pub fn with_conn<F, T>(&self, ctx: &Context, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        ctx.check()?;

        let conn = self.acquire(ctx)?;

        let watched = AssertUnwindSafe(ctx.clone());
        conn.progress_handler(PROGRESS_INTERVAL, Some(move || interrupted(&watched)));
        let result = f(&conn);
        conn.progress_handler(PROGRESS_INTERVAL, None::<fn() -> bool>);

        result.map_err(|err| match err.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => match ctx.check() {
                Err(done) => done,
                Ok(()) => StoreError::Cancelled,
            },
            _ => err.into(),
        })
    }

    /// Wait for a free connection, re-checking `ctx` between short waits.
    fn acquire(&self, ctx: &Context) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        let give_up = Instant::now().checked_add(self.connection_timeout);

        loop {
            ctx.check()?;

            let mut slice = ACQUIRE_SLICE;
            if let Some(give_up) = give_up {
                slice = slice.min(give_up.saturating_duration_since(Instant::now()));
            }
            if let Some(remaining) = ctx.remaining() {
                slice = slice.min(remaining);
            }

            match self.pool.get_timeout(slice) {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    // A timeout caused by the caller's deadline should read as such.
                    ctx.check()?;
                    if give_up.is_some_and(|give_up| Instant::now() >= give_up) {
                        return Err(err.into());
                    }
                    trace!("Still waiting for a pooled connection");
                }
            }
        }
    }
}

fn interrupted(ctx: &AssertUnwindSafe<Context>) -> bool {
    ctx.is_done()
}

/// Helper methods
impl Database {
    /// Read a unix-millisecond column as a UTC timestamp.
    pub(crate) fn get_timestamp_column(row: &Row, index: usize) -> rusqlite::Result<DateTime<Utc>> {
        let millis: i64 = row.get(index)?;
        DateTime::from_timestamp_millis(millis)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(index, millis))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{open_temp, open_temp_with_pool};
    use super::*;
    use std::thread;

    #[test]
    fn reopening_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::new(dir.path().join("db.sqlite3"));

        let db = Database::open(&config).unwrap();
        db.with_conn(&Context::background(), |conn| {
            conn.execute(
                "INSERT INTO snippets (title, content, created, expires) VALUES ('a', 'b', 0, 1)",
                (),
            )
        })
        .unwrap();
        db.close();

        let db = Database::open(&config).unwrap();
        let count: i64 = db
            .with_conn(&Context::background(), |conn| {
                conn.query_row("SELECT COUNT(*) FROM snippets", (), |row| row.get(0))
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn done_context_never_touches_the_pool() {
        let (_dir, db) = open_temp();

        let ctx = Context::background();
        ctx.cancel();
        let result = db.with_conn(&ctx, |_| Ok(()));
        assert!(matches!(result, Err(StoreError::Cancelled)));

        let ctx = Context::with_timeout(Duration::ZERO);
        let result = db.with_conn(&ctx, |_| Ok(()));
        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
    }

    #[test]
    fn deadline_interrupts_running_statement() {
        let (_dir, db) = open_temp();
        let ctx = Context::with_timeout(Duration::from_millis(100));
        let started = Instant::now();

        let result = db.with_conn(&ctx, |conn| {
            conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c LIMIT 1000000000)
                 SELECT COUNT(*) FROM c",
                (),
                |row| row.get::<_, i64>(0),
            )
        });

        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancel_from_another_thread() {
        let (_dir, db) = open_temp();
        let ctx = Context::background();

        let result = thread::scope(|s| {
            let canceller = ctx.clone();
            s.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                canceller.cancel();
            });

            db.with_conn(&ctx, |conn| {
                conn.query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c LIMIT 1000000000)
                     SELECT COUNT(*) FROM c",
                    (),
                    |row| row.get::<_, i64>(0),
                )
            })
        });

        assert!(matches!(result, Err(StoreError::Cancelled)));
    }

    #[test]
    fn connection_is_reusable_after_interrupt() {
        let (_dir, db) = open_temp();
        let ctx = Context::background();
        ctx.cancel();
        let _ = db.with_conn(&ctx, |_| Ok(()));

        let one: i64 = db
            .with_conn(&Context::background(), |conn| {
                conn.query_row("SELECT 1", (), |row| row.get(0))
            })
            .unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn deadline_bounds_wait_on_full_pool() {
        let (_dir, db) = open_temp_with_pool(1);
        let _held = db.pool.get().unwrap();

        let ctx = Context::with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let result = db.with_conn(&ctx, |_| Ok(()));

        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancel_while_waiting_for_connection() {
        let (_dir, db) = open_temp_with_pool(1);
        let _held = db.pool.get().unwrap();
        let ctx = Context::background();
        let started = Instant::now();

        let result = thread::scope(|s| {
            let canceller = ctx.clone();
            s.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                canceller.cancel();
            });

            db.with_conn(&ctx, |_| Ok(()))
        });

        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn full_pool_times_out_as_pool_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DatabaseConfig::new(dir.path().join("db.sqlite3"));
        config.pool_size = 1;
        config.connection_timeout = Duration::from_millis(100);
        let db = Database::open(&config).unwrap();
        let _held = db.pool.get().unwrap();

        let result = db.with_conn(&Context::background(), |_| Ok(()));
        assert!(matches!(result, Err(StoreError::Pool(_))));
    }
}
