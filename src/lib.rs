//! Bounded connection pool
//!
//! [`ConnPool`] lends out up to `max_size` connections, blocks callers once it is
//! exhausted and evicts connections that stayed idle for too long.
//! [`SingleConnPool`] pins one connection of an underlying pool for callers that
//! need every request to go over the same socket. Both implement [`Pool`].

pub mod avail_list;
pub mod common;
pub mod conn;
pub mod dial;
pub mod error;
pub mod options;
pub mod pool;
pub mod single;
pub mod transport;

pub use conn::Conn;
pub use error::{Error, Result};
pub use options::Options;
pub use pool::{ConnPool, Pool};
pub use single::SingleConnPool;
pub use transport::Transport;
