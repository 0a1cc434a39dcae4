use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use serde::{Serialize, Deserialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flow {
    pub start:    SystemTime,
    pub end:      SystemTime,
    pub protocol: u8,
    pub src:      Addr,
    pub dst:      Addr,
    pub point:    Point,
    pub kind:     Kind,
    pub stats:    Stats,
    pub reverse:  Stats,
    pub kube:     Kube,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Addr {
    pub addr: IpAddr,
    pub port: u16,
}

/// Which side of the flow the reporting agent observed.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum Point {
    Source,
    Destination,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum Kind {
    Intra,
    Inter,
    External,
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Stats {
    pub bytes:         u64,
    pub packets:       u64,
    pub bytes_delta:   u64,
    pub packets_delta: u64,
    pub throughput:    u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Kube {
    pub src_pod:     String,
    pub src_ns:      String,
    pub src_node:    String,
    pub dst_pod:     String,
    pub dst_ns:      String,
    pub dst_node:    String,
    pub dst_service: String,
    pub src_labels:  Option<HashMap<String, String>>,
    pub dst_labels:  Option<HashMap<String, String>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Key(pub u8, pub Addr, pub Addr);

impl Flow {
    pub fn key(&self) -> Key {
        Key(self.protocol, self.src, self.dst)
    }

    pub fn is_ipv4(&self) -> bool {
        self.src.addr.is_ipv4()
    }

    /// Zeroes the per-window counters so the next export reports
    /// only new activity.
    pub fn reset_stats(&mut self) {
        self.stats.reset_window();
        self.reverse.reset_window();
    }

    /// Derives the throughput fields from the accumulated counters
    /// and the flow duration.
    pub fn finalize(&mut self) {
        let duration = self.end.duration_since(self.start).unwrap_or(Duration::ZERO);
        self.stats.throughput   = rate(self.stats.bytes, duration);
        self.reverse.throughput = rate(self.reverse.bytes, duration);
    }
}

impl Stats {
    pub fn add(&mut self, other: &Stats) {
        self.bytes         += other.bytes;
        self.packets       += other.packets;
        self.bytes_delta   += other.bytes_delta;
        self.packets_delta += other.packets_delta;
    }

    pub fn reset_window(&mut self) {
        self.bytes_delta   = 0;
        self.packets_delta = 0;
        self.throughput    = 0;
    }
}

impl Kube {
    /// Fills identity fields that are still empty from the other
    /// observation point's view of the flow.
    pub fn fill(&mut self, other: &Kube) {
        let take = |field: &mut String, value: &String| {
            if field.is_empty() && !value.is_empty() {
                *field = value.clone();
            }
        };

        take(&mut self.src_pod,     &other.src_pod);
        take(&mut self.src_ns,      &other.src_ns);
        take(&mut self.src_node,    &other.src_node);
        take(&mut self.dst_pod,     &other.dst_pod);
        take(&mut self.dst_ns,      &other.dst_ns);
        take(&mut self.dst_node,    &other.dst_node);
        take(&mut self.dst_service, &other.dst_service);
    }
}

fn rate(bytes: u64, duration: Duration) -> u64 {
    match duration.as_secs() {
        0 => 0,
        n => bytes.saturating_mul(8) / n,
    }
}

impl Default for Flow {
    fn default() -> Self {
        let zero = Addr {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        };
        Self {
            start:    UNIX_EPOCH,
            end:      UNIX_EPOCH,
            protocol: 0,
            src:      zero,
            dst:      zero,
            point:    Point::Source,
            kind:     Kind::Inter,
            stats:    Stats::default(),
            reverse:  Stats::default(),
            kube:     Kube::default(),
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.1, self.2, self.0)
    }
}
