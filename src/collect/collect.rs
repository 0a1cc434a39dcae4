use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use anyhow::Result;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError::*;
use futures::prelude::*;
use log::{debug, error, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_serde::{SymmetricallyFramed, formats::SymmetricalJson};
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use crate::aggregate::Flow;

/// Counters exposed by whatever transport feeds the ingest channel.
pub trait Collector: Send + Sync {
    fn num_records_received(&self) -> i64;
    fn num_conns(&self) -> i64;
}

/// Accepts framed JSON record batches from agents and forwards each
/// record onto the ingest channel.
pub struct TcpCollector {
    received: Arc<AtomicI64>,
    conns:    Arc<AtomicI64>,
}

impl TcpCollector {
    pub fn new(addr: String, tx: Sender<Flow>, handle: &Handle) -> Self {
        let received = Arc::new(AtomicI64::new(0));
        let conns    = Arc::new(AtomicI64::new(0));

        handle.spawn(execute(addr, tx, received.clone(), conns.clone()));

        Self {
            received: received,
            conns:    conns,
        }
    }
}

impl Collector for TcpCollector {
    fn num_records_received(&self) -> i64 {
        self.received.load(Ordering::Relaxed)
    }

    fn num_conns(&self) -> i64 {
        self.conns.load(Ordering::Relaxed)
    }
}

async fn execute(addr: String, tx: Sender<Flow>, received: Arc<AtomicI64>, conns: Arc<AtomicI64>) {
    match listen(addr, tx, received, conns).await {
        Ok(()) => debug!("collector finished"),
        Err(e) => error!("collector failed: {}", e),
    }
}

async fn listen(addr: String, tx: Sender<Flow>, received: Arc<AtomicI64>, conns: Arc<AtomicI64>) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    loop {
        let (sock, addr) = listener.accept().await?;
        debug!("connection from {}", addr);

        let tx       = tx.clone();
        let received = received.clone();
        let conns    = conns.clone();

        conns.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            match agent(sock, tx, received).await {
                Ok(()) => debug!("agent {} finished", addr),
                Err(e) => error!("agent {} error: {}", addr, e),
            }
            conns.fetch_add(-1, Ordering::Relaxed);
        });
    }
}

async fn agent(sock: TcpStream, tx: Sender<Flow>, received: Arc<AtomicI64>) -> Result<()> {
    let mut length = LengthDelimitedCodec::new();
    length.set_max_frame_length(32 * 1024 * 1024);
    let framed = FramedRead::new(sock, length);
    let format = SymmetricalJson::<Vec<Flow>>::default();

    let mut codec = SymmetricallyFramed::new(framed, format);

    while let Some(rs) = codec.try_next().await? {
        received.fetch_add(rs.len() as i64, Ordering::Relaxed);
        for r in rs {
            match tx.try_send(r) {
                Ok(())               => (),
                Err(Full(_))         => warn!("ingest channel full"),
                Err(Disconnected(_)) => return Ok(()),
            }
        }
    }

    Ok(())
}
