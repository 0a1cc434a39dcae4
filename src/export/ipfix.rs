use std::time::Duration;
use anyhow::{anyhow, Result};
use futures_util::sink::SinkExt;
use log::{debug, warn};
use serde::{Serialize, Deserialize};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::time::sleep;
use tokio_serde::{SymmetricallyFramed, formats::SymmetricalJson};
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use uuid::Uuid;
use crate::aggregate::Flow;
use crate::config::{Options, Transport};
use super::Exporter;

/// Pushes completed records to the downstream collector. A background
/// task drains a bounded queue and writes framed records, reconnecting
/// until the exporter is stopped.
pub struct IpfixExporter {
    cluster_uuid: String,
    cluster_id:   String,
    address:      String,
    transport:    Transport,
    rt:           Runtime,
    tx:           Option<Sender<Payload>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payload {
    pub cluster_uuid: String,
    pub cluster_id:   String,
    pub flow:         Flow,
}

impl IpfixExporter {
    pub fn new(uuid: Uuid, id: &str, opts: &Options) -> Result<Self> {
        Ok(Self {
            cluster_uuid: uuid.to_string(),
            cluster_id:   id.to_owned(),
            address:      opts.config.collector.address.clone(),
            transport:    opts.config.collector.transport,
            rt:           Runtime::new()?,
            tx:           None,
        })
    }
}

impl Exporter for IpfixExporter {
    fn start(&mut self) {
        debug!("ipfix exporter to {} ({:?})", self.address, self.transport);
        let (tx, rx) = channel(1024);
        self.rt.spawn(dispatch(self.address.clone(), rx));
        self.tx = Some(tx);
    }

    fn stop(&mut self) {
        self.tx = None;
    }

    fn update_options(&mut self, opts: &Options) {
        let collector = &opts.config.collector;
        if collector.address == self.address && collector.transport == self.transport {
            return;
        }

        self.address   = collector.address.clone();
        self.transport = collector.transport;

        if self.tx.is_some() {
            debug!("ipfix exporter reconnecting to {}", self.address);
            self.stop();
            self.start();
        }
    }

    fn add_record(&mut self, flow: &Flow, _ipv6: bool) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| anyhow!("exporter not started"))?;
        let payload = Payload {
            cluster_uuid: self.cluster_uuid.clone(),
            cluster_id:   self.cluster_id.clone(),
            flow:         flow.clone(),
        };
        tx.try_send(payload).map_err(|_| anyhow!("export queue full"))
    }
}

async fn dispatch(addr: String, mut rx: Receiver<Payload>) {
    loop {
        let sock = connect(&addr).await;

        let mut length = LengthDelimitedCodec::new();
        length.set_max_frame_length(32 * 1024 * 1024);
        let framed = FramedWrite::new(sock, length);
        let format = SymmetricalJson::default();

        let mut codec = SymmetricallyFramed::new(framed, format);

        loop {
            let payload = match rx.recv().await {
                Some(payload) => payload,
                None          => return,
            };

            if let Err(e) = codec.send(payload).await {
                warn!("write error: {}", e);
                break;
            }
        }
    }
}

async fn connect(addr: &str) -> TcpStream {
    loop {
        let err = match TcpStream::connect(addr).await {
            Ok(sock) => return sock,
            Err(e)   => e,
        };

        warn!("connection error: {}", err);

        sleep(Duration::from_secs(1)).await;
    }
}
