//! Dial functions

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// Returns a dial function connecting to `addr`
///
/// Every resolved address is tried in turn; the last error is returned if none
/// of them accept. A zero `timeout` falls back to the system connect timeout.
pub fn tcp<A>(addr: A, timeout: Duration) -> impl Fn() -> io::Result<TcpStream> + Send + Sync
where
    A: ToSocketAddrs + Send + Sync,
{
    move || {
        let mut last_err = None;
        for sock_addr in addr.to_socket_addrs()? {
            let attempt = if timeout.is_zero() {
                TcpStream::connect(sock_addr)
            } else {
                TcpStream::connect_timeout(&sock_addr, timeout)
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%sock_addr, "dialed");
                    return Ok(stream);
                }
                Err(err) => {
                    debug!(%sock_addr, %err, "dial failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "address resolved to nothing",
            )
        }))
    }
}
