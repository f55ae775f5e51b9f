use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use connpool::{Conn, ConnPool, Options, Pool, SingleConnPool, common, dial};
use eyre::{Context, bail, eyre};
use tracing::{debug, info, warn};

/// Run newline echo round trips through a shared connection pool
#[derive(Parser, Debug)]
struct Args {
    /// Echo server to talk to; a loopback one is started if omitted
    #[arg(long)]
    addr: Option<SocketAddr>,
    #[arg(long, default_value_t = 4)]
    pool_size: usize,
    /// 0 disables idle eviction
    #[arg(long, default_value_t = 0)]
    idle_timeout_ms: u64,
    #[arg(long, default_value_t = 16)]
    workers: usize,
    /// Round trips per worker
    #[arg(long, default_value_t = 100)]
    requests: usize,
}

fn main() -> eyre::Result<()> {
    common::initialize_logging()?;
    let args = Args::parse();
    if args.pool_size == 0 {
        bail!("--pool-size must be positive");
    }

    let addr = match args.addr {
        Some(addr) => addr,
        None => spawn_echo_server().wrap_err("starting echo server")?,
    };
    let options = Options::default()
        .pool_size(args.pool_size)
        .idle_timeout(Duration::from_millis(args.idle_timeout_ms));
    let pool = Arc::new(ConnPool::with_options(
        dial::tcp(addr, options.dial_timeout),
        &options,
    ));

    let started = Instant::now();
    thread::scope(|scope| -> eyre::Result<()> {
        let workers: Vec<_> = (0..args.workers)
            .map(|worker| {
                let pool = &pool;
                scope.spawn(move || run_worker(pool, worker, args.requests))
            })
            .collect();
        for worker in workers {
            worker.join().map_err(|_| eyre!("worker panicked"))??;
        }
        Ok(())
    })?;
    info!(
        elapsed = ?started.elapsed(),
        total = pool.len(),
        idle = pool.idle_len(),
        "workers finished"
    );

    run_session(&pool).wrap_err("pinned session")?;
    info!(total = pool.len(), idle = pool.idle_len(), "session finished");

    pool.close().wrap_err("closing pool")?;
    Ok(())
}

fn echo(cn: &Conn<TcpStream>, msg: &str) -> eyre::Result<()> {
    cn.write_all(format!("{msg}\n").as_bytes())?;
    let mut line = String::new();
    cn.read_line(&mut line)?;
    if line.trim_end() != msg {
        bail!("expected echo of {msg:?}, got {line:?}");
    }
    Ok(())
}

fn run_worker(pool: &ConnPool<TcpStream>, worker: usize, requests: usize) -> eyre::Result<()> {
    for request in 0..requests {
        let (cn, fresh) = pool.acquire()?;
        if fresh {
            debug!(worker, conn = cn.id(), "got new connection");
        }
        if let Err(err) = echo(&cn, &format!("{worker}:{request}")) {
            warn!(worker, conn = cn.id(), "round trip failed, dropping connection");
            pool.remove(&cn)?;
            return Err(err);
        }
        pool.release(&cn)?;
    }
    Ok(())
}

/// Several round trips that must share one socket
fn run_session(pool: &Arc<ConnPool<TcpStream>>) -> eyre::Result<()> {
    let session = SingleConnPool::new(Arc::clone(pool), true);
    let mut conn_ids = Vec::new();
    for step in ["MULTI", "INCR counter", "EXEC"] {
        let (cn, _) = session.acquire()?;
        echo(&cn, step)?;
        conn_ids.push(cn.id());
        session.release(&cn)?;
    }
    if conn_ids.windows(2).any(|pair| pair[0] != pair[1]) {
        bail!("session moved between connections: {conn_ids:?}");
    }
    session.close()?;
    Ok(())
}

fn spawn_echo_server() -> eyre::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    thread::spawn(move || {
                        if let Err(err) = serve_echo(stream) {
                            debug!(%err, "echo connection ended");
                        }
                    });
                }
                Err(err) => warn!(%err, "accept failed"),
            }
        }
    });
    info!(%addr, "echo server listening");
    Ok(addr)
}

fn serve_echo(stream: TcpStream) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    for line in BufReader::new(stream).lines() {
        writeln!(writer, "{}", line?)?;
    }
    Ok(())
}
