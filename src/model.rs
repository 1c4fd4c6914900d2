pub mod database;
pub mod memory;
pub mod snippet;
pub mod user;

pub use database::Database;
pub use memory::MemoryUserStore;
pub use snippet::{Snippet, SnippetStore, LATEST_LIMIT};
pub use user::{User, UserStore, Users};
