//! Pooled connections

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::avail_list::Handle;
use crate::transport::Transport;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Produces new connections for a [`ConnPool`](crate::ConnPool)
pub type Factory<S> = Box<dyn Fn() -> io::Result<Conn<S>> + Send + Sync>;

/// zero means no deadline
fn deadline(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

/// Transport side of the buffered reader. The deadline is set right before
/// every call reaches the transport.
struct DeadlineReader<S> {
    transport: Arc<S>,
    timeout: Duration,
}

impl<S: Transport> Read for DeadlineReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Transport::set_read_timeout(&*self.transport, deadline(self.timeout))?;
        Transport::read(&*self.transport, buf)
    }
}

struct DeadlineWriter<S> {
    transport: Arc<S>,
    timeout: Duration,
}

impl<S: Transport> Write for DeadlineWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Transport::set_write_timeout(&*self.transport, deadline(self.timeout))?;
        Transport::write(&*self.transport, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Transport::flush(&*self.transport)
    }
}

/// Pool bookkeeping, only written while the owning pool's lock is held
pub(crate) struct Bookkeeping {
    pub in_use: bool,
    pub used_at: Instant,
    pub slot: Option<Handle>,
}

/// A transport together with its protocol read buffer and timeouts
///
/// Connections are shared as `Arc<Conn<S>>` between a pool and whoever borrowed
/// them. The borrower does I/O through `&self` methods (or through the
/// [`Read`]/[`Write`] impls on `&Conn<S>`) and hands the connection back with
/// [`Pool::release`](crate::Pool::release) once everything it read is consumed.
///
/// Reads and writes take separate locks: a write from one thread is not held
/// up by another thread blocked in a read.
pub struct Conn<S> {
    id: u64,
    transport: Arc<S>,
    rd: Mutex<BufReader<DeadlineReader<S>>>,
    wr: Mutex<DeadlineWriter<S>>,
    pub(crate) meta: Mutex<Bookkeeping>,
}

impl<S: Transport> Conn<S> {
    pub fn new(transport: S) -> Self {
        let transport = Arc::new(transport);
        let reader = DeadlineReader {
            transport: Arc::clone(&transport),
            timeout: Duration::ZERO,
        };
        let writer = DeadlineWriter {
            transport: Arc::clone(&transport),
            timeout: Duration::ZERO,
        };
        Conn {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            rd: Mutex::new(BufReader::new(reader)),
            wr: Mutex::new(writer),
            meta: Mutex::new(Bookkeeping {
                in_use: false,
                used_at: Instant::now(),
                slot: None,
            }),
        }
    }

    /// Process-unique id, handy for log fields
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn get_ref(&self) -> &S {
        &self.transport
    }

    pub fn read_timeout(&self) -> Duration {
        self.rd.lock().get_ref().timeout
    }

    /// Applies to every following read that reaches the transport. Zero disables
    /// the deadline.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.rd.lock().get_mut().timeout = timeout;
    }

    pub fn write_timeout(&self) -> Duration {
        self.wr.lock().timeout
    }

    /// Applies to every following write. Zero disables the deadline.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.wr.lock().timeout = timeout;
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.rd.lock().read(buf)
    }

    pub fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        self.rd.lock().read_exact(buf)
    }

    pub fn read_until(&self, byte: u8, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.rd.lock().read_until(byte, buf)
    }

    pub fn read_line(&self, buf: &mut String) -> io::Result<usize> {
        self.rd.lock().read_line(buf)
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.wr.lock().write(buf)
    }

    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.wr.lock().write_all(buf)
    }

    pub fn flush(&self) -> io::Result<()> {
        self.wr.lock().flush()
    }

    /// Number of bytes read from the transport but not consumed yet
    pub fn buffered(&self) -> usize {
        self.rd.lock().buffer().len()
    }

    /// Closes the transport. Takes neither I/O lock, so a blocked reader is woken
    /// up rather than waited for.
    pub fn close(&self) -> io::Result<()> {
        self.transport.close()
    }

    pub fn in_use(&self) -> bool {
        self.meta.lock().in_use
    }

    /// Whether some pool still tracks this connection
    pub fn is_tracked(&self) -> bool {
        self.meta.lock().slot.is_some()
    }
}

impl<S: Transport> Read for &Conn<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Conn::read(*self, buf)
    }
}

impl<S: Transport> Write for &Conn<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Conn::flush(*self)
    }
}

impl<S> fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Turn a dial function into a connection factory
pub fn factory<S, D>(dial: D) -> Factory<S>
where
    S: Transport,
    D: Fn() -> io::Result<S> + Send + Sync + 'static,
{
    factory_with_timeouts(dial, Duration::ZERO, Duration::ZERO)
}

/// Like [`factory`], with read/write timeouts preset on every new connection
pub fn factory_with_timeouts<S, D>(
    dial: D,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Factory<S>
where
    S: Transport,
    D: Fn() -> io::Result<S> + Send + Sync + 'static,
{
    Box::new(move || {
        let cn = Conn::new(dial()?);
        cn.set_read_timeout(read_timeout);
        cn.set_write_timeout(write_timeout);
        Ok(cn)
    })
}
