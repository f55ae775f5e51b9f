//! Pool configuration

use std::time::Duration;

/// Settings for a [`ConnPool`](crate::ConnPool) and the connections it dials
///
/// A zero duration disables the corresponding timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Maximum number of connections, idle or on loan
    pub pool_size: usize,
    /// How long a connection may stay idle before the next acquire closes it
    pub idle_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Used by [`dial::tcp`](crate::dial::tcp)
    pub dial_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            pool_size: 10,
            idle_timeout: Duration::ZERO,
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            dial_timeout: Duration::from_secs(5),
        }
    }
}

impl Options {
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }
}
