pub mod password;
pub mod token;

pub use password::*;
pub use token::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("Stored password hash is malformed")]
    MalformedHash,
}
