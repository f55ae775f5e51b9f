use std::io;

use thiserror::Error;

/// Errors returned by pool operations
///
/// Misuse of the pool (releasing a connection with unread data, releasing a
/// connection the pool does not own) is not represented here; it panics.
#[derive(Debug, Error)]
pub enum Error {
    #[error("attempt to use closed connection pool")]
    Closed,
    #[error("failed to establish connection")]
    Dial(#[source] io::Error),
    #[error("failed to close connection")]
    Close(#[source] io::Error),
}

impl Error {
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
