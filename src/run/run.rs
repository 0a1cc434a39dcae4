use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, never, tick, Receiver, Sender, select};
use log::{debug, error, info, warn};
use tokio::runtime::Runtime;
use uuid::Uuid;
use crate::aggregate::{Flow, Key, Process, Record};
use crate::collect::{Collector, TcpCollector};
use crate::config::{self, Mode, Options};
use crate::enrich::{NodeStore, PodStore, ServiceStore};
use crate::export::{Exporter, Factories};
use super::Metrics;

/// Composes the aggregation process, the collector, the metadata
/// stores and the exporter set, and runs the control loops that tie
/// them together.
pub struct Aggregator {
    mode:         Mode,
    active:       Duration,
    log_tick:     Duration,
    options:      Options,
    cluster_uuid: Uuid,
    cluster_id:   String,
    pod_labels:   bool,
    process:      Arc<Process>,
    collector:    Box<dyn Collector>,
    pods:         Arc<dyn PodStore>,
    nodes:        Arc<dyn NodeStore>,
    services:     Arc<dyn ServiceStore>,
    ipfix:        Option<Box<dyn Exporter>>,
    column:       Option<Box<dyn Exporter>>,
    bucket:       Option<Box<dyn Exporter>>,
    logfile:      Option<Box<dyn Exporter>>,
    factories:    Factories,
    update_tx:    Sender<Options>,
    update_rx:    Receiver<Options>,
    records:      Receiver<Flow>,
    exported:     AtomicI64,
    dropped:      AtomicI64,
    config:       PathBuf,
    rt:           Runtime,
}

impl Aggregator {
    pub fn new(
        config:       &Path,
        cluster_uuid: Uuid,
        pods:         Arc<dyn PodStore>,
        nodes:        Arc<dyn NodeStore>,
        services:     Arc<dyn ServiceStore>,
        factories:    Factories,
    ) -> Result<Self> {
        let options = Options::load(config)?;

        let cluster_id = match options.config.cluster_id.is_empty() {
            true  => cluster_uuid.to_string(),
            false => options.config.cluster_id.clone(),
        };

        let rt = Runtime::new()?;
        let (record_tx, record_rx) = bounded(1_000);
        let (update_tx, update_rx) = bounded(100);

        let collector = TcpCollector::new(options.config.listen.clone(), record_tx, rt.handle());
        let process   = Arc::new(Process::new(record_rx.clone(), options.active, options.inactive));

        let mut aggregator = Self {
            mode:         options.mode,
            active:       options.active,
            log_tick:     Duration::from_secs(60),
            cluster_uuid: cluster_uuid,
            cluster_id:   cluster_id,
            pod_labels:   options.config.pod_labels,
            process:      process,
            collector:    Box::new(collector),
            pods:         pods,
            nodes:        nodes,
            services:     services,
            ipfix:        None,
            column:       None,
            bucket:       None,
            logfile:      None,
            factories:    factories,
            update_tx:    update_tx,
            update_rx:    update_rx,
            records:      record_rx,
            exported:     AtomicI64::new(0),
            dropped:      AtomicI64::new(0),
            config:       config.to_path_buf(),
            options:      options,
            rt:           rt,
        };
        aggregator.build()?;

        Ok(aggregator)
    }

    /// Runs until the stop channel closes. Returns after the
    /// aggregation process, the configuration watcher and the export
    /// loop have all exited.
    pub fn run(mut self, stop: Receiver<()>) -> Result<()> {
        while !self.synced() {
            select! {
                recv(stop) -> _ => return Ok(()),
                default(Duration::from_millis(100)) => (),
            }
        }

        for (name, exporter) in self.sinks() {
            debug!("starting {} exporter", name);
            exporter.start();
        }

        let process = match self.mode {
            Mode::Aggregate => {
                let process = self.process.clone();
                Some(thread::spawn(move || process.start()))
            },
            Mode::Proxy => None,
        };

        let watcher = {
            let path = self.config.clone();
            let tx   = self.update_tx.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                if let Err(e) = config::watch(&path, &tx, &stop) {
                    error!("configuration watch failed: {}", e);
                }
            })
        };

        self.export_loop(stop);

        watcher.join().map_err(|_| anyhow!("configuration watcher panicked"))?;
        if let Some(process) = process {
            process.join().map_err(|_| anyhow!("aggregation process panicked"))?;
        }

        Ok(())
    }

    /// The main loop: periodic expiry scans, metric logging,
    /// configuration updates and (in proxy mode) the record channel.
    /// A closed update or record channel means "nothing available",
    /// never termination.
    pub(crate) fn export_loop(&mut self, stop: Receiver<()>) {
        let export = tick(self.active);
        let logs   = tick(self.log_tick);

        let mut updates = self.update_rx.clone();
        let mut records = match self.mode {
            Mode::Proxy     => self.records.clone(),
            Mode::Aggregate => never(),
        };

        loop {
            select! {
                recv(stop) -> _ => break,
                recv(export) -> _ => {
                    if self.mode == Mode::Aggregate {
                        self.flush();
                    }
                },
                recv(logs) -> _ => {
                    let m = self.metrics();
                    info!("flows: {}, exported: {}, dropped: {}, connections: {}",
                          m.flows, m.exported, m.dropped, m.conns);
                },
                recv(updates) -> msg => match msg {
                    Ok(opts) => self.apply(opts),
                    Err(_)   => updates = never(),
                },
                recv(records) -> msg => match msg {
                    Ok(flow) => { let _ = self.proxy_record(flow); },
                    Err(_)   => records = never(),
                },
            }
        }

        for (name, exporter) in self.sinks() {
            debug!("stopping {} exporter", name);
            exporter.stop();
        }
        self.ipfix   = None;
        self.column  = None;
        self.bucket  = None;
        self.logfile = None;

        self.process.stop();
    }

    pub(crate) fn flush(&mut self) {
        let process = self.process.clone();
        process.for_all_expired(|key, record| self.send_record(key, record));
    }

    /// Prepares one expired record and fans it out to every live
    /// exporter. Returns Err when any sink failed so the record stays
    /// in the table for the next sweep.
    fn send_record(&mut self, key: &Key, record: &mut Record) -> Result<()> {
        record.flow.reset_stats();

        if !record.correlated_filled() {
            record.flow.finalize();
            record.set_correlated_filled(true);
        }

        if !record.external_filled() {
            if self.pod_labels {
                let at = record.flow.start;
                record.flow.kube.src_labels = self.fetch_pod_labels(record.flow.src.addr, at);
                record.flow.kube.dst_labels = self.fetch_pod_labels(record.flow.dst.addr, at);
            }
            record.set_external_filled(true);
        }

        let ipv6 = !record.flow.is_ipv4();

        let mut failed = 0;
        for (name, exporter) in self.sinks() {
            if let Err(e) = exporter.add_record(&record.flow, ipv6) {
                warn!("{} exporter error: {}", name, e);
                failed += 1;
            }
        }

        if failed > 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(anyhow!("{} exporter(s) failed for flow {}", failed, key));
        }

        self.exported.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stateless fast path: enrich the incoming record and hand it to
    /// the downstream collector only.
    pub(crate) fn proxy_record(&mut self, mut flow: Flow) -> Result<()> {
        let at = flow.start;

        if flow.kube.src_pod.is_empty() && flow.kube.dst_pod.is_empty() {
            self.fill_k8s_metadata(&mut flow, at);
        }
        if self.pod_labels {
            flow.kube.src_labels = self.fetch_pod_labels(flow.src.addr, at);
            flow.kube.dst_labels = self.fetch_pod_labels(flow.dst.addr, at);
        }

        let ipv6 = !flow.is_ipv4();

        let exporter = match self.ipfix.as_mut() {
            Some(exporter) => exporter,
            None           => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            },
        };

        match exporter.add_record(&flow, ipv6) {
            Ok(()) => {
                self.exported.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                warn!("ipfix exporter error: {}", e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(e)
            },
        }
    }

    /// None exactly when no pod owns the address at that time; a found
    /// pod without labels yields an empty map, which is distinct.
    pub(crate) fn fetch_pod_labels(&self, ip: IpAddr, at: SystemTime) -> Option<HashMap<String, String>> {
        let pod = self.pods.get_pod_by_ip_and_time(ip, at)?;
        Some(pod.labels.clone().unwrap_or_default())
    }

    /// Resolves both addresses independently; a miss on one side never
    /// prevents filling the other.
    fn fill_k8s_metadata(&self, flow: &mut Flow, at: SystemTime) {
        if let Some(pod) = self.pods.get_pod_by_ip_and_time(flow.src.addr, at) {
            flow.kube.src_pod  = pod.name.clone();
            flow.kube.src_ns   = pod.ns.clone();
            flow.kube.src_node = pod.node.clone();
        } else if let Some(node) = self.nodes.get_node_by_ip(flow.src.addr) {
            flow.kube.src_node = node.name.clone();
        }

        if let Some(pod) = self.pods.get_pod_by_ip_and_time(flow.dst.addr, at) {
            flow.kube.dst_pod  = pod.name.clone();
            flow.kube.dst_ns   = pod.ns.clone();
            flow.kube.dst_node = pod.node.clone();
        } else if let Some(service) = self.services.get_service_by_ip_and_time(flow.dst.addr, at) {
            flow.kube.dst_service = format!("{}/{}", service.ns, service.name);
        }
    }

    /// Applies a new configuration snapshot: per-sink lifecycle
    /// transitions plus the live pod-labels flag. Fields that cannot
    /// change without a restart are reported and skipped.
    pub(crate) fn apply(&mut self, new: Options) {
        let ignored = config::unsupported(&self.options, &new);
        if !ignored.is_empty() {
            info!("ignoring unsupported configuration updates, restart required: {:?}", ignored);
        }

        if new.config.collector.enable {
            match self.ipfix.as_mut() {
                Some(exporter) => exporter.update_options(&new),
                None => match (self.factories.ipfix)(self.cluster_uuid, &self.cluster_id, &new) {
                    Ok(mut exporter) => {
                        exporter.start();
                        self.ipfix = Some(exporter);
                    },
                    Err(e) => error!("failed to create ipfix exporter: {}", e),
                },
            }
        } else if let Some(mut exporter) = self.ipfix.take() {
            exporter.stop();
        }

        if new.config.database.enable {
            match self.column.as_mut() {
                Some(exporter) => exporter.update_options(&new),
                None => match (self.factories.column)(self.cluster_uuid, &new) {
                    Ok(mut exporter) => {
                        exporter.start();
                        self.column = Some(exporter);
                    },
                    Err(e) => error!("failed to create database exporter: {}", e),
                },
            }
        } else if let Some(mut exporter) = self.column.take() {
            exporter.stop();
        }

        if new.config.storage.enable {
            match self.bucket.as_mut() {
                Some(exporter) => exporter.update_options(&new),
                None => match (self.factories.bucket)(self.cluster_uuid, &new) {
                    Ok(mut exporter) => {
                        exporter.start();
                        self.bucket = Some(exporter);
                    },
                    Err(e) => error!("failed to create storage exporter: {}", e),
                },
            }
        } else if let Some(mut exporter) = self.bucket.take() {
            exporter.stop();
        }

        if new.config.logfile.enable {
            match self.logfile.as_mut() {
                Some(exporter) => exporter.update_options(&new),
                None => match (self.factories.logfile)(&new) {
                    Ok(mut exporter) => {
                        exporter.start();
                        self.logfile = Some(exporter);
                    },
                    Err(e) => error!("failed to create logfile exporter: {}", e),
                },
            }
        } else if let Some(mut exporter) = self.logfile.take() {
            exporter.stop();
        }

        self.pod_labels = new.config.pod_labels;
        self.options = new;
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            exported:     self.exported.load(Ordering::Relaxed),
            received:     self.collector.num_records_received(),
            dropped:      self.dropped.load(Ordering::Relaxed),
            flows:        self.process.num_flows(),
            conns:        self.collector.num_conns(),
            with_ipfix:   self.ipfix.is_some(),
            with_column:  self.column.is_some(),
            with_bucket:  self.bucket.is_some(),
            with_logfile: self.logfile.is_some(),
        }
    }

    /// Builds instances for every sink enabled at construction time;
    /// a failure here is fatal to startup.
    fn build(&mut self) -> Result<()> {
        let opts = self.options.clone();
        if opts.config.collector.enable {
            self.ipfix = Some((self.factories.ipfix)(self.cluster_uuid, &self.cluster_id, &opts)?);
        }
        if opts.config.database.enable {
            self.column = Some((self.factories.column)(self.cluster_uuid, &opts)?);
        }
        if opts.config.storage.enable {
            self.bucket = Some((self.factories.bucket)(self.cluster_uuid, &opts)?);
        }
        if opts.config.logfile.enable {
            self.logfile = Some((self.factories.logfile)(&opts)?);
        }
        Ok(())
    }

    fn sinks(&mut self) -> Vec<(&'static str, &mut Box<dyn Exporter>)> {
        let mut sinks = Vec::new();
        if let Some(e) = self.ipfix.as_mut() {
            sinks.push(("ipfix", e));
        }
        if let Some(e) = self.column.as_mut() {
            sinks.push(("database", e));
        }
        if let Some(e) = self.bucket.as_mut() {
            sinks.push(("storage", e));
        }
        if let Some(e) = self.logfile.as_mut() {
            sinks.push(("logfile", e));
        }
        sinks
    }

    fn synced(&self) -> bool {
        self.pods.has_synced() && self.nodes.has_synced() && self.services.has_synced()
    }

    pub(crate) fn process(&self) -> Arc<Process> {
        self.process.clone()
    }

    pub(crate) fn updates(&self) -> Sender<Options> {
        self.update_tx.clone()
    }

    pub(crate) fn close_updates(&mut self) {
        self.update_tx = bounded(0).0;
    }
}
