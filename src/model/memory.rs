use std::sync::Mutex;

use chrono::Utc;
use log::trace;

use super::user::{Id, User, Users};
use crate::{
    auth::Hasher,
    config::HashConfig,
    context::Context,
    error::{Error, Result, StoreError},
};

/// In-memory [`Users`] for exercising collaborators without a database.
///
/// Follows the same error contract as [`UserStore`](super::UserStore).
pub struct MemoryUserStore {
    hasher: Hasher,
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new(config: &HashConfig) -> Result<MemoryUserStore> {
        Ok(MemoryUserStore {
            hasher: Hasher::new(config).map_err(StoreError::from)?,
            users: Mutex::new(Vec::new()),
        })
    }
}

impl Users for MemoryUserStore {
    fn insert(&self, ctx: &Context, name: &str, email: &str, password: &str) -> Result<Id> {
        ctx.check()?;
        let hashed_password = self.hasher.hash_password(password)?;

        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if users.iter().any(|user| user.email == email) {
            return Err(Error::DuplicateEmail);
        }

        let id = users.len() as Id + 1;
        users.push(User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            hashed_password,
            created: Utc::now(),
        });

        trace!("Added in-memory user {}", id);
        Ok(id)
    }

    fn authenticate(&self, ctx: &Context, email: &str, password: &str) -> Result<Id> {
        ctx.check()?;

        let found = {
            let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
            users
                .iter()
                .find(|user| user.email == email)
                .map(|user| (user.id, user.hashed_password.clone()))
        };

        match found {
            Some((id, hash)) if self.hasher.check_password(password, &hash)? => Ok(id),
            _ => Err(Error::InvalidCredentials),
        }
    }

    fn exists(&self, ctx: &Context, id: Id) -> Result<bool> {
        ctx.check()?;
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        Ok(users.iter().any(|user| user.id == id))
    }
}
