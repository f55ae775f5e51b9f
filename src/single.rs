//! Single-connection pool

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::conn::Conn;
use crate::error::Result;
use crate::pool::Pool;

type HeldConn<P> = Arc<Conn<<P as Pool>::Transport>>;

/// A pool that always hands out the same connection
///
/// The connection comes from an underlying pool, either up front
/// ([`SingleConnPool::with_conn`]) or on the first acquire. It goes back on
/// [`Pool::close`]: released for reuse if the pool is reusable, removed
/// otherwise. Releasing or removing through this pool never reaches the
/// underlying pool.
pub struct SingleConnPool<P: Pool> {
    pool: P,
    cn: RwLock<Option<HeldConn<P>>>,
    reusable: bool,
}

impl<P: Pool> SingleConnPool<P> {
    /// Acquire lazily from `pool`
    pub fn new(pool: P, reusable: bool) -> Self {
        SingleConnPool {
            pool,
            cn: RwLock::new(None),
            reusable,
        }
    }

    /// Pin a connection already acquired from `pool`
    pub fn with_conn(pool: P, cn: HeldConn<P>, reusable: bool) -> Self {
        SingleConnPool {
            pool,
            cn: RwLock::new(Some(cn)),
            reusable,
        }
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Pool the connection comes from
    pub fn inner(&self) -> &P {
        &self.pool
    }

    fn check_owned(held: &Option<HeldConn<P>>, cn: &HeldConn<P>) {
        let owned = held.as_ref().is_some_and(|held| Arc::ptr_eq(held, cn));
        assert!(
            owned,
            "single pool: connection {} is not the pinned connection",
            cn.id()
        );
    }
}

impl<P: Pool> Pool for SingleConnPool<P> {
    type Transport = P::Transport;

    fn acquire(&self) -> Result<(HeldConn<P>, bool)> {
        if let Some(cn) = self.cn.read().as_ref() {
            return Ok((Arc::clone(cn), false));
        }

        let mut held = self.cn.write();
        // someone else may have won the race for the write lock
        if let Some(cn) = held.as_ref() {
            return Ok((Arc::clone(cn), false));
        }
        let (cn, fresh) = self.pool.acquire()?;
        debug!(conn = cn.id(), fresh, "pinned connection");
        *held = Some(Arc::clone(&cn));
        Ok((cn, fresh))
    }

    fn release(&self, cn: &HeldConn<P>) -> Result<()> {
        Self::check_owned(&self.cn.read(), cn);
        Ok(())
    }

    fn remove(&self, cn: &HeldConn<P>) -> Result<()> {
        let mut held = self.cn.write();
        Self::check_owned(&held, cn);
        *held = None;
        Ok(())
    }

    fn idle_len(&self) -> usize {
        usize::from(self.cn.read().is_some())
    }

    fn len(&self) -> usize {
        usize::from(self.cn.read().is_some())
    }

    fn close(&self) -> Result<()> {
        let mut held = self.cn.write();
        let Some(cn) = held.take() else {
            return Ok(());
        };
        debug!(conn = cn.id(), reusable = self.reusable, "unpinning connection");
        if self.reusable {
            self.pool.release(&cn)
        } else {
            self.pool.remove(&cn)
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::SingleConnPool;
    use crate::conn::{self, Conn};
    use crate::error::Error;
    use crate::pool::{ConnPool, Pool};
    use crate::transport::mock::MockTransport;

    fn counting_pool(max_size: usize) -> (Arc<ConnPool<MockTransport>>, Arc<AtomicUsize>) {
        let made = Arc::new(AtomicUsize::new(0));
        let pool = {
            let made = Arc::clone(&made);
            ConnPool::new(
                conn::factory(move || {
                    made.fetch_add(1, Ordering::SeqCst);
                    Ok(MockTransport::new())
                }),
                max_size,
                Duration::ZERO,
            )
        };
        (Arc::new(pool), made)
    }

    #[test]
    fn acquire_returns_same_connection() {
        let (pool, made) = counting_pool(2);
        let single = SingleConnPool::new(Arc::clone(&pool), true);
        assert_eq!((single.idle_len(), single.len()), (0, 0));

        let (first, fresh) = single.acquire().unwrap();
        assert!(fresh);
        let (second, fresh) = single.acquire().unwrap();
        assert!(!fresh);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(made.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!((single.idle_len(), single.len()), (1, 1));
    }

    #[test]
    fn concurrent_first_acquire_pins_one_connection() {
        let (pool, made) = counting_pool(4);
        let single = Arc::new(SingleConnPool::new(Arc::clone(&pool), true));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let single = Arc::clone(&single);
                thread::spawn(move || single.acquire().unwrap().0)
            })
            .collect();
        let conns: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(conns.iter().all(|cn| Arc::ptr_eq(cn, &conns[0])));
        assert_eq!(made.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_keeps_connection_pinned() {
        let (pool, _) = counting_pool(2);
        let single = SingleConnPool::new(Arc::clone(&pool), true);
        let (cn, _) = single.acquire().unwrap();
        single.release(&cn).unwrap();
        assert_eq!(pool.idle_len(), 0);
        assert!(cn.in_use());
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn reusable_close_returns_connection() {
        let (pool, _) = counting_pool(2);
        let single = SingleConnPool::new(Arc::clone(&pool), true);
        let (cn, _) = single.acquire().unwrap();

        single.close().unwrap();
        assert_eq!(single.len(), 0);
        assert_eq!(pool.idle_len(), 1);
        assert_eq!(pool.len(), 1);
        assert!(!cn.in_use());
        assert_eq!(cn.get_ref().closes(), 0);

        let (again, fresh) = pool.acquire().unwrap();
        assert!(!fresh);
        assert!(Arc::ptr_eq(&cn, &again));

        // nothing left to hand back
        single.close().unwrap();
    }

    #[test]
    fn non_reusable_close_discards_connection() {
        let (pool, _) = counting_pool(2);
        let (other, _) = pool.acquire().unwrap();
        let (cn, _) = pool.acquire().unwrap();
        let single = SingleConnPool::with_conn(Arc::clone(&pool), Arc::clone(&cn), false);
        assert!(!single.is_reusable());
        assert_eq!(pool.len(), 2);

        let (pinned, fresh) = single.acquire().unwrap();
        assert!(!fresh);
        assert!(Arc::ptr_eq(&pinned, &cn));

        single.close().unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(cn.get_ref().closes(), 1);
        assert!(!cn.is_tracked());
        assert!(other.is_tracked());
    }

    #[test]
    fn remove_forgets_without_closing() {
        let (pool, _) = counting_pool(2);
        let single = SingleConnPool::new(Arc::clone(&pool), true);
        let (cn, _) = single.acquire().unwrap();

        single.remove(&cn).unwrap();
        assert_eq!(single.len(), 0);
        assert_eq!(cn.get_ref().closes(), 0);
        assert_eq!(pool.len(), 1);

        // close has nothing to return; the caller still owns the connection
        single.close().unwrap();
        assert_eq!(pool.idle_len(), 0);
        pool.remove(&cn).unwrap();
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn close_propagates_underlying_error() {
        let (pool, _) = counting_pool(1);
        let single = SingleConnPool::new(Arc::clone(&pool), true);
        single.acquire().unwrap();
        pool.close().unwrap();

        assert!(matches!(single.close(), Err(Error::Closed)));
        assert_eq!(single.len(), 0);
    }

    #[test]
    fn acquire_error_leaves_nothing_pinned() {
        let (pool, _) = counting_pool(1);
        pool.close().unwrap();
        let single = SingleConnPool::new(Arc::clone(&pool), true);
        assert!(single.acquire().unwrap_err().is_closed());
        assert_eq!(single.len(), 0);
    }

    #[test]
    #[should_panic(expected = "not the pinned connection")]
    fn release_of_other_connection_panics() {
        let (pool, _) = counting_pool(2);
        let single = SingleConnPool::new(Arc::clone(&pool), true);
        single.acquire().unwrap();
        let stray = Arc::new(Conn::new(MockTransport::new()));
        let _ = single.release(&stray);
    }

    #[test]
    #[should_panic(expected = "not the pinned connection")]
    fn remove_before_acquire_panics() {
        let (pool, _) = counting_pool(2);
        let (cn, _) = pool.acquire().unwrap();
        let single = SingleConnPool::new(Arc::clone(&pool), false);
        let _ = single.remove(&cn);
    }
}
