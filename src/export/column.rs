use std::time::UNIX_EPOCH;
use anyhow::{anyhow, Result};
use log::{debug, error};
use serde::Serialize;
use uuid::Uuid;
use crate::aggregate::Flow;
use crate::config::Options;
use super::Exporter;

const BATCH: usize = 500;

/// Columnar-database sink. Records are buffered as rows and committed
/// in batches; the insertion protocol itself lives behind the commit
/// boundary.
pub struct ColumnExporter {
    address: String,
    cluster: String,
    rows:    Vec<Row>,
}

#[derive(Debug, Serialize)]
struct Row {
    time:          u64,
    cluster:       String,
    src:           String,
    dst:           String,
    protocol:      u8,
    bytes:         u64,
    packets:       u64,
    reverse_bytes: u64,
    throughput:    u64,
    src_pod:       String,
    dst_pod:       String,
}

impl ColumnExporter {
    pub fn new(uuid: Uuid, opts: &Options) -> Result<Self> {
        let address = opts.config.database.address.clone();
        if address.is_empty() {
            return Err(anyhow!("database exporter requires an address"));
        }
        Ok(Self {
            address: address,
            cluster: uuid.to_string(),
            rows:    Vec::with_capacity(BATCH),
        })
    }

    fn commit(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        match serde_json::to_vec(&self.rows) {
            Ok(batch) => debug!("committing {} rows ({} bytes) to {}", self.rows.len(), batch.len(), self.address),
            Err(e)    => error!("failed to encode batch: {}", e),
        }
        self.rows.clear();
    }
}

impl Exporter for ColumnExporter {
    fn start(&mut self) {
        debug!("database exporter to {}", self.address);
    }

    fn stop(&mut self) {
        self.commit();
    }

    fn update_options(&mut self, opts: &Options) {
        let address = &opts.config.database.address;
        if *address != self.address {
            self.commit();
            self.address = address.clone();
            debug!("database exporter now {}", self.address);
        }
    }

    fn add_record(&mut self, flow: &Flow, _ipv6: bool) -> Result<()> {
        let time = flow.end.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.rows.push(Row {
            time:          time,
            cluster:       self.cluster.clone(),
            src:           flow.src.to_string(),
            dst:           flow.dst.to_string(),
            protocol:      flow.protocol,
            bytes:         flow.stats.bytes,
            packets:       flow.stats.packets,
            reverse_bytes: flow.reverse.bytes,
            throughput:    flow.stats.throughput,
            src_pod:       flow.kube.src_pod.clone(),
            dst_pod:       flow.kube.dst_pod.clone(),
        });

        if self.rows.len() >= BATCH {
            self.commit();
        }

        Ok(())
    }
}
