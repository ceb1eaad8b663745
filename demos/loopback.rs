use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
    time::Instant,
};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use log::debug;
use spindle::{
    config::{LoopPoolConfig, SessionConfig},
    engine::plain::PlainEngine,
    futures::SessionFuture,
    reactor::pool::LoopPool,
    session::{Session, Transport},
    task::ThreadExecutor,
};

#[derive(Parser, Debug)]
struct Args {
    /// Number of messages the client sends.
    #[arg(short, long, default_value_t = 1000)]
    messages: usize,

    /// Size of each message in bytes.
    #[arg(short, long, default_value_t = 1024)]
    size: usize,

    /// Most selector loops to start.
    #[arg(short, long, default_value_t = 2)]
    loops: usize,
}

/// Sends into the peer session and counts what gets delivered.
struct Link {
    peer: Arc<OnceLock<Arc<Session>>>,
    delivered: Arc<AtomicUsize>,
}

impl Transport for Link {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        let peer = self
            .peer
            .get()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer yet"))?;

        peer.receive(Bytes::copy_from_slice(buf))
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }

    fn deliver(&mut self, data: Bytes) {
        self.delivered.fetch_add(data.len(), Ordering::Relaxed);
    }

    fn close(&mut self) {
        debug!("link closed");
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let pool = LoopPool::new(LoopPoolConfig {
        capacity: args.loops,
        ..Default::default()
    });
    let tasks = Arc::new(ThreadExecutor::default());

    let to_server = Arc::new(OnceLock::new());
    let to_client = Arc::new(OnceLock::new());
    let received = Arc::new(AtomicUsize::new(0));

    let server = Session::open(
        SessionConfig::default(),
        Box::new(PlainEngine::default()),
        Box::new(Link {
            peer: to_client.clone(),
            delivered: received.clone(),
        }),
        &pool,
        tasks.clone(),
    )
    .context("Could not open server session")?;

    let client = Session::open(
        SessionConfig::default(),
        Box::new(PlainEngine::default()),
        Box::new(Link {
            peer: to_server.clone(),
            delivered: Arc::new(AtomicUsize::new(0)),
        }),
        &pool,
        tasks,
    )
    .context("Could not open client session")?;

    let _ = to_server.set(server.clone());
    let _ = to_client.set(client.clone());

    client.futures().open_future().sync()?;
    server.futures().open_future().sync()?;
    println!(
        "Sessions {} and {} open on {} loop(s)",
        client.id(),
        server.id(),
        pool.len()
    );

    let payload = Bytes::from(vec![b'x'; args.size]);
    let start = Instant::now();

    let mut last = None;
    for _ in 0..args.messages {
        last = Some(client.write(payload.clone()));
    }
    if let Some(last) = last {
        last.sync()?;
    }

    let elapsed = start.elapsed();
    let sent = client.futures().data_future().length();
    println!(
        "Sent {} bytes in {:?} ({:.1} MiB/s)",
        sent,
        elapsed,
        sent as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / (1024.0 * 1024.0)
    );

    client.close()?;
    client.futures().end_future().sync()?;
    server.close()?;
    server.futures().end_future().sync()?;

    eprintln!(
        "Conversation finished. Server received {} bytes",
        received.load(Ordering::Relaxed)
    );

    pool.stop();
    pool.join();

    Ok(())
}
