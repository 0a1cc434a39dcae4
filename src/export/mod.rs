pub use bucket::BucketExporter;
pub use column::ColumnExporter;
pub use exporter::{Exporter, Factories};
pub use ipfix::{IpfixExporter, Payload};
pub use logfile::LogExporter;

mod bucket;
mod column;
mod exporter;
mod ipfix;
mod logfile;

#[cfg(test)]
mod test;
