use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;
use parking_lot::Mutex;
use super::object::{Node, Pod, Service};

/// Point-in-time address to workload resolution. An address reused
/// over time must resolve to the workload owning it at that time.
pub trait PodStore: Send + Sync {
    fn get_pod_by_ip_and_time(&self, ip: IpAddr, at: SystemTime) -> Option<Arc<Pod>>;
    fn has_synced(&self) -> bool;
}

pub trait NodeStore: Send + Sync {
    fn get_node_by_ip(&self, ip: IpAddr) -> Option<Arc<Node>>;
    fn has_synced(&self) -> bool;
}

pub trait ServiceStore: Send + Sync {
    fn get_service_by_ip_and_time(&self, ip: IpAddr, at: SystemTime) -> Option<Arc<Service>>;
    fn has_synced(&self) -> bool;
}

struct Span<T> {
    from:   SystemTime,
    to:     Option<SystemTime>,
    object: Arc<T>,
}

/// In-memory store with per-entry validity windows. Stands in for the
/// cluster-backed stores when running standalone and in tests.
pub struct StaticStore {
    pods:     Mutex<HashMap<IpAddr, Vec<Span<Pod>>>>,
    services: Mutex<HashMap<IpAddr, Vec<Span<Service>>>>,
    nodes:    Mutex<HashMap<IpAddr, Arc<Node>>>,
}

impl StaticStore {
    pub fn new() -> Self {
        Self {
            pods:     Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
            nodes:    Mutex::new(HashMap::new()),
        }
    }

    pub fn add_pod(&self, ip: IpAddr, pod: Pod, from: SystemTime, to: Option<SystemTime>) {
        let span = Span {
            from:   from,
            to:     to,
            object: Arc::new(pod),
        };
        self.pods.lock().entry(ip).or_insert_with(Vec::new).push(span);
    }

    pub fn add_service(&self, ip: IpAddr, service: Service, from: SystemTime, to: Option<SystemTime>) {
        let span = Span {
            from:   from,
            to:     to,
            object: Arc::new(service),
        };
        self.services.lock().entry(ip).or_insert_with(Vec::new).push(span);
    }

    pub fn add_node(&self, ip: IpAddr, node: Node) {
        self.nodes.lock().insert(ip, Arc::new(node));
    }
}

impl<T> Span<T> {
    fn owns(&self, at: SystemTime) -> bool {
        self.from <= at && self.to.map_or(true, |to| at < to)
    }
}

impl PodStore for StaticStore {
    fn get_pod_by_ip_and_time(&self, ip: IpAddr, at: SystemTime) -> Option<Arc<Pod>> {
        let pods = self.pods.lock();
        let span = pods.get(&ip)?.iter().find(|s| s.owns(at))?;
        Some(span.object.clone())
    }

    fn has_synced(&self) -> bool {
        true
    }
}

impl NodeStore for StaticStore {
    fn get_node_by_ip(&self, ip: IpAddr) -> Option<Arc<Node>> {
        self.nodes.lock().get(&ip).cloned()
    }

    fn has_synced(&self) -> bool {
        true
    }
}

impl ServiceStore for StaticStore {
    fn get_service_by_ip_and_time(&self, ip: IpAddr, at: SystemTime) -> Option<Arc<Service>> {
        let services = self.services.lock();
        let span = services.get(&ip)?.iter().find(|s| s.owns(at))?;
        Some(span.object.clone())
    }

    fn has_synced(&self) -> bool {
        true
    }
}
