use std::collections::HashMap;
use std::time::{Duration, Instant};
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender, select};
use log::{debug, warn};
use parking_lot::Mutex;
use super::flow::{Flow, Key, Kind};

/// Correlation state for one flow key: the merged record plus the
/// bookkeeping the export path needs.
#[derive(Debug)]
pub struct Record {
    pub flow:   Flow,
    ready:      bool,
    correlated: bool,
    external:   bool,
    created:    Instant,
    updated:    Instant,
}

/// The aggregation process: owns the key -> record table, consumes the
/// ingest channel, and applies the timeout-driven eviction policy.
pub struct Process {
    flows:    Mutex<HashMap<Key, Record>>,
    rx:       Receiver<Flow>,
    stop:     Mutex<Option<Sender<()>>>,
    wait:     Receiver<()>,
    active:   Duration,
    inactive: Duration,
}

impl Process {
    pub fn new(rx: Receiver<Flow>, active: Duration, inactive: Duration) -> Self {
        let (tx, wait) = bounded(0);
        Self {
            flows:    Mutex::new(HashMap::new()),
            rx:       rx,
            stop:     Mutex::new(Some(tx)),
            wait:     wait,
            active:   active,
            inactive: inactive,
        }
    }

    /// Consumes the ingest channel until stop() is called or the
    /// channel closes. Double-start is a caller error.
    pub fn start(&self) {
        debug!("aggregation process started");
        loop {
            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(flow) => self.ingest(flow),
                    Err(_)   => break,
                },
                recv(self.wait) -> _ => break,
            }
        }
        debug!("aggregation process finished");
    }

    pub fn stop(&self) {
        self.stop.lock().take();
    }

    /// Inserts a new record or merges this observation into the
    /// existing one for the same key.
    pub fn ingest(&self, flow: Flow) {
        let key = flow.key();
        let now = Instant::now();

        let mut flows = self.flows.lock();
        match flows.get_mut(&key) {
            Some(record) => record.merge(&flow, now),
            None         => { flows.insert(key, Record::new(flow, now)); },
        }
    }

    /// Visits every record past its active or inactive expiry,
    /// removing it when the callback succeeds. A failed callback
    /// leaves the record in place for the next sweep.
    pub fn for_all_expired<F>(&self, mut f: F)
    where
        F: FnMut(&Key, &mut Record) -> Result<()>,
    {
        let now = Instant::now();
        self.flows.lock().retain(|key, record| {
            if !record.expired(now, self.active, self.inactive) {
                return true;
            }
            match f(key, record) {
                Ok(()) => false,
                Err(e) => {
                    warn!("flow {} not evicted: {}", key, e);
                    true
                },
            }
        });
    }

    pub fn num_flows(&self) -> i64 {
        self.flows.lock().len() as i64
    }
}

impl Record {
    fn new(flow: Flow, now: Instant) -> Self {
        let ready = flow.kind != Kind::Inter;
        Self {
            flow:       flow,
            ready:      ready,
            correlated: false,
            external:   false,
            created:    now,
            updated:    now,
        }
    }

    fn merge(&mut self, flow: &Flow, now: Instant) {
        self.flow.stats.add(&flow.stats);
        self.flow.reverse.add(&flow.reverse);
        self.flow.kube.fill(&flow.kube);

        if flow.end > self.flow.end {
            self.flow.end = flow.end;
        }
        if flow.point != self.flow.point {
            self.ready = true;
        }
        self.updated = now;
    }

    fn expired(&self, now: Instant, active: Duration, inactive: Duration) -> bool {
        now.saturating_duration_since(self.created) >= active
            || now.saturating_duration_since(self.updated) >= inactive
    }

    pub fn ready_to_send(&self) -> bool {
        self.ready
    }

    pub fn correlated_filled(&self) -> bool {
        self.correlated
    }

    pub fn set_correlated_filled(&mut self, filled: bool) {
        self.correlated = filled;
    }

    pub fn external_filled(&self) -> bool {
        self.external
    }

    pub fn set_external_filled(&mut self, filled: bool) {
        self.external = filled;
    }
}
