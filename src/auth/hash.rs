use argon2::{
    password_hash::{
        self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

use crate::config::HashConfig;

/// Argon2id hasher with fixed work factors.
#[derive(Clone)]
pub struct Hasher {
    argon2: Argon2<'static>,
}

impl Hasher {
    pub fn new(config: &HashConfig) -> Result<Hasher, argon2::Error> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )?;

        Ok(Hasher {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a password to a PHC string (`$argon2id$v=19$...`) with a fresh salt.
    pub fn hash_password(&self, password: &str) -> Result<String, password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        Ok(password_hash)
    }

    /// Check a password against a stored PHC string.
    ///
    /// A mismatch is `Ok(false)`. A hash that cannot be parsed or verified is an error.
    pub fn check_password(&self, password: &str, hash: &str) -> Result<bool, password_hash::Error> {
        let parsed = PasswordHash::new(hash)?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_config() -> HashConfig {
    HashConfig {
        memory_kib: Params::MIN_M_COST,
        iterations: 1,
        parallelism: 1,
    }
}
