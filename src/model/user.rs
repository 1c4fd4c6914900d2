use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use log::{debug, trace};
use rusqlite::OptionalExtension;

use super::Database;
use crate::{
    auth::Hasher,
    clock::{Clock, SystemClock},
    config::HashConfig,
    context::Context,
    error::{Error, Result, StoreError},
};

pub type Id = i64;

#[derive(Clone, Debug, serde::Serialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    #[serde(skip)] // Never expose credential material
    pub hashed_password: String,
    pub created: DateTime<Utc>,
}

/// Registration and credential checks, independent of where users are kept.
pub trait Users: Send + Sync {
    /// Register a user. Fails with [`Error::DuplicateEmail`] if the email is taken.
    fn insert(&self, ctx: &Context, name: &str, email: &str, password: &str) -> Result<Id>;

    /// The id of the user with these credentials.
    ///
    /// Unknown email and wrong password both fail with [`Error::InvalidCredentials`].
    fn authenticate(&self, ctx: &Context, email: &str, password: &str) -> Result<Id>;

    fn exists(&self, ctx: &Context, id: Id) -> Result<bool>;
}

/// [`Users`] backed by the `users` table.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
    hasher: Hasher,
    clock: Arc<dyn Clock>,
    /// Verified against when the email is unknown, so that path costs the same.
    dummy_hash: Arc<str>,
}

impl UserStore {
    pub fn new(db: Database, config: &HashConfig) -> Result<UserStore> {
        UserStore::with_clock(db, config, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, config: &HashConfig, clock: Arc<dyn Clock>) -> Result<UserStore> {
        let hasher = Hasher::new(config).map_err(StoreError::from)?;
        let dummy_hash = hasher.hash_password("not a real password")?.into();

        Ok(UserStore {
            db,
            hasher,
            clock,
            dummy_hash,
        })
    }
}

impl Users for UserStore {
    fn insert(&self, ctx: &Context, name: &str, email: &str, password: &str) -> Result<Id> {
        ctx.check()?;
        let hashed_password = self.hasher.hash_password(password)?;
        let now = self.clock.now();
        let created = now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now);

        trace!("Adding user");

        // Only a clash on `email` is swallowed; every other constraint still errors.
        let id: Option<Id> = self.db.with_conn(ctx, |conn| {
            conn.query_row(
                "INSERT INTO users (name, email, hashed_password, created)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (email) DO NOTHING
                 RETURNING id",
                (name, email, hashed_password.as_str(), created.timestamp_millis()),
                |row| row.get(0),
            )
            .optional()
        })?;

        match id {
            Some(id) => {
                debug!("Added user {}", id);
                Ok(id)
            }
            None => {
                trace!("Email already registered");
                Err(Error::DuplicateEmail)
            }
        }
    }

    fn authenticate(&self, ctx: &Context, email: &str, password: &str) -> Result<Id> {
        trace!("Authenticating user");

        let found: Option<(Id, String)> = self.db.with_conn(ctx, |conn| {
            conn.query_row(
                "SELECT id, hashed_password FROM users WHERE email = ?1",
                (email,),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;

        let Some((id, hashed_password)) = found else {
            let _ = self.hasher.check_password(password, &self.dummy_hash);
            trace!("No user with that email");
            return Err(Error::InvalidCredentials);
        };

        ctx.check()?;
        if !self.hasher.check_password(password, &hashed_password)? {
            trace!("Password incorrect for user {}", id);
            return Err(Error::InvalidCredentials);
        }

        Ok(id)
    }

    fn exists(&self, ctx: &Context, id: Id) -> Result<bool> {
        trace!("Checking user {} exists", id);

        let exists = self.db.with_conn(ctx, |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                (id,),
                |row| row.get(0),
            )
        })?;

        Ok(exists)
    }
}
