use anyhow::Result;
use uuid::Uuid;
use crate::aggregate::Flow;
use crate::config::Options;
use super::{BucketExporter, ColumnExporter, IpfixExporter, LogExporter};

/// Uniform lifecycle contract implemented by every sink.
pub trait Exporter: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn update_options(&mut self, opts: &Options);
    fn add_record(&mut self, flow: &Flow, ipv6: bool) -> Result<()>;
}

/// Constructor-injected exporter factories. The set of sink kinds is
/// closed; tests substitute these to observe lifecycle calls.
pub struct Factories {
    pub ipfix:   Box<dyn Fn(Uuid, &str, &Options) -> Result<Box<dyn Exporter>> + Send>,
    pub column:  Box<dyn Fn(Uuid, &Options) -> Result<Box<dyn Exporter>> + Send>,
    pub bucket:  Box<dyn Fn(Uuid, &Options) -> Result<Box<dyn Exporter>> + Send>,
    pub logfile: Box<dyn Fn(&Options) -> Result<Box<dyn Exporter>> + Send>,
}

impl Default for Factories {
    fn default() -> Self {
        Self {
            ipfix:   Box::new(ipfix),
            column:  Box::new(column),
            bucket:  Box::new(bucket),
            logfile: Box::new(logfile),
        }
    }
}

fn ipfix(uuid: Uuid, id: &str, opts: &Options) -> Result<Box<dyn Exporter>> {
    Ok(Box::new(IpfixExporter::new(uuid, id, opts)?))
}

fn column(uuid: Uuid, opts: &Options) -> Result<Box<dyn Exporter>> {
    Ok(Box::new(ColumnExporter::new(uuid, opts)?))
}

fn bucket(uuid: Uuid, opts: &Options) -> Result<Box<dyn Exporter>> {
    Ok(Box::new(BucketExporter::new(uuid, opts)?))
}

fn logfile(opts: &Options) -> Result<Box<dyn Exporter>> {
    Ok(Box::new(LogExporter::new(opts)?))
}
