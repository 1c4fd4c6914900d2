//! Persistence and identity core for a snippet-sharing service.
//!
//! [`SnippetStore`] keeps short-lived text snippets that disappear from every read
//! once they expire. [`UserStore`] registers users and verifies their passwords.
//! Both share a pooled [`Database`] handle and take a [`Context`] on every call.

pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod logger;
pub mod model;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, DatabaseConfig, HashConfig};
pub use context::Context;
pub use error::{Error, Result, StoreError};
pub use model::{Database, MemoryUserStore, Snippet, SnippetStore, User, UserStore, Users};
