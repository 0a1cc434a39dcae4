pub use collect::{Collector, TcpCollector};

mod collect;
