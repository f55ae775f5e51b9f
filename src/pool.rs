//! Connection pools

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::avail_list::{AvailabilityList, Handle};
use crate::conn::{self, Conn, Factory};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::transport::Transport;

/// Operations shared by [`ConnPool`] and [`SingleConnPool`](crate::SingleConnPool)
pub trait Pool: Send + Sync {
    type Transport: Transport;

    /// Borrow a connection. The flag is true if it was just created.
    fn acquire(&self) -> Result<(Arc<Conn<Self::Transport>>, bool)>;

    /// Give a borrowed connection back for reuse
    ///
    /// # Panics
    ///
    /// If the connection still holds buffered data or is not on loan from this
    /// pool.
    fn release(&self, cn: &Arc<Conn<Self::Transport>>) -> Result<()>;

    /// Stop tracking a connection and close it
    fn remove(&self, cn: &Arc<Conn<Self::Transport>>) -> Result<()>;

    /// Number of idle connections
    fn idle_len(&self) -> usize;

    /// Number of connections tracked, idle or not
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self) -> Result<()>;
}

impl<P: Pool + ?Sized> Pool for Arc<P> {
    type Transport = P::Transport;

    fn acquire(&self) -> Result<(Arc<Conn<Self::Transport>>, bool)> {
        (**self).acquire()
    }

    fn release(&self, cn: &Arc<Conn<Self::Transport>>) -> Result<()> {
        (**self).release(cn)
    }

    fn remove(&self, cn: &Arc<Conn<Self::Transport>>) -> Result<()> {
        (**self).remove(cn)
    }

    fn idle_len(&self) -> usize {
        (**self).idle_len()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

struct PoolState<S> {
    conns: AvailabilityList<Arc<Conn<S>>>,
    closed: bool,
}

impl<S: Transport> PoolState<S> {
    /// Position of `cn` in this pool's ordering
    fn slot_of(&self, cn: &Arc<Conn<S>>) -> Option<Handle> {
        let slot = cn.meta.lock().slot?;
        assert!(
            Arc::ptr_eq(self.conns.get(slot), cn),
            "pool: connection {} belongs to another pool",
            cn.id()
        );
        Some(slot)
    }

    fn untrack(&mut self, slot: Handle) -> Arc<Conn<S>> {
        let cn = self.conns.remove(slot);
        cn.meta.lock().slot = None;
        cn
    }

    /// Close connections that have been idle for longer than `idle_timeout`
    fn evict_idle(&mut self, idle_timeout: Duration) {
        while let Some(slot) = self.conns.front_idle() {
            {
                let meta = self.conns.get(slot).meta.lock();
                assert!(!meta.in_use, "pool: idle connection is marked in use");
                // the idle region is ordered by release time
                if meta.used_at.elapsed() <= idle_timeout {
                    break;
                }
            }
            let cn = self.untrack(slot);
            debug!(conn = cn.id(), "evicting idle connection");
            if let Err(err) = cn.close() {
                error!(conn = cn.id(), %err, "failed to close idle connection");
            }
        }
    }
}

/// Bounded pool of connections
///
/// - at most `max_size` connections exist at any time; [`Pool::acquire`] blocks
///   while all of them are on loan
/// - idle connections are lent out in the order they were released
/// - with a non-zero idle timeout, every acquire first closes connections that
///   sat idle for longer than that
pub struct ConnPool<S> {
    factory: Factory<S>,
    state: Mutex<PoolState<S>>,
    available: Condvar,
    max_size: usize,
    idle_timeout: Duration,
}

impl<S: Transport> ConnPool<S> {
    /// Create a pool. A zero `idle_timeout` disables idle eviction.
    ///
    /// # Panics
    ///
    /// If `max_size` is zero.
    pub fn new(factory: Factory<S>, max_size: usize, idle_timeout: Duration) -> Self {
        assert!(max_size > 0, "pool size must be positive");
        ConnPool {
            factory,
            state: Mutex::new(PoolState {
                conns: AvailabilityList::new(),
                closed: false,
            }),
            available: Condvar::new(),
            max_size,
            idle_timeout,
        }
    }

    /// Create a pool of connections produced by `dial`, configured by `options`
    pub fn with_options<D>(dial: D, options: &Options) -> Self
    where
        D: Fn() -> io::Result<S> + Send + Sync + 'static,
    {
        let factory =
            conn::factory_with_timeouts(dial, options.read_timeout, options.write_timeout);
        Self::new(factory, options.pool_size, options.idle_timeout)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<S: Transport> Pool for ConnPool<S> {
    type Transport = S;

    fn acquire(&self) -> Result<(Arc<Conn<S>>, bool)> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }

        if !self.idle_timeout.is_zero() {
            state.evict_idle(self.idle_timeout);
        }

        while state.conns.len() >= self.max_size && state.conns.idle_len() == 0 {
            self.available.wait(&mut state);
            if state.closed {
                return Err(Error::Closed);
            }
        }

        if let Some(slot) = state.conns.front_idle() {
            let cn = Arc::clone(state.conns.get(slot));
            {
                let mut meta = cn.meta.lock();
                assert!(!meta.in_use, "pool: idle connection is marked in use");
                meta.in_use = true;
            }
            state.conns.promote(slot);
            return Ok((cn, false));
        }

        // the wait loop only exits with an idle connection or spare capacity
        debug_assert!(state.conns.len() < self.max_size);
        let cn = match (self.factory)() {
            Ok(cn) => Arc::new(cn),
            Err(err) => {
                // the capacity this caller was woken for is still free
                self.available.notify_one();
                return Err(Error::Dial(err));
            }
        };
        let slot = state.conns.push_busy(Arc::clone(&cn));
        {
            let mut meta = cn.meta.lock();
            meta.in_use = true;
            meta.slot = Some(slot);
        }
        debug!(conn = cn.id(), total = state.conns.len(), "created connection");
        Ok((cn, true))
    }

    fn release(&self, cn: &Arc<Conn<S>>) -> Result<()> {
        let buffered = cn.buffered();
        if buffered != 0 {
            panic!(
                "pool: attempt to release connection {} with {buffered} buffered bytes",
                cn.id()
            );
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        let Some(slot) = state.slot_of(cn) else {
            panic!("pool: attempt to release untracked connection {}", cn.id());
        };
        {
            let mut meta = cn.meta.lock();
            assert!(
                meta.in_use,
                "pool: attempt to release idle connection {}",
                cn.id()
            );
            meta.in_use = false;
            meta.used_at = Instant::now();
        }
        state.conns.demote(slot);
        self.available.notify_one();
        Ok(())
    }

    fn remove(&self, cn: &Arc<Conn<S>>) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            // already closed along with the pool
            return Ok(());
        }
        let slot = state.slot_of(cn);
        let result = cn.close().map_err(Error::Close);
        if let Some(slot) = slot {
            state.untrack(slot);
            cn.meta.lock().in_use = false;
            debug!(conn = cn.id(), total = state.conns.len(), "removed connection");
        }
        self.available.notify_one();
        result
    }

    fn idle_len(&self) -> usize {
        self.state.lock().conns.idle_len()
    }

    fn len(&self) -> usize {
        self.state.lock().conns.len()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut result = Ok(());
        for cn in state.conns.drain() {
            {
                let mut meta = cn.meta.lock();
                meta.slot = None;
                meta.in_use = false;
            }
            if let Err(err) = cn.close() {
                error!(conn = cn.id(), %err, "failed to close connection");
                result = Err(Error::Close(err));
            }
        }
        // blocked acquirers give up with `Error::Closed`
        self.available.notify_all();
        result
    }
}
