pub mod hash;

pub use hash::Hasher;
