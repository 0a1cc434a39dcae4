use std::fs;
use anyhow::Result;
use tempfile::TempDir;
use uuid::Uuid;
use crate::aggregate::Flow;
use crate::config::{Config, Options};
use super::*;

fn options<F>(f: F) -> Options
where
    F: FnOnce(&mut Config),
{
    let mut config = Config::default();
    f(&mut config);
    Options::new(config).unwrap()
}

#[test]
fn logfile_writes_json_lines() -> Result<()> {
    let dir  = TempDir::new()?;
    let path = dir.path().join("flows.log");

    let opts = options(|c| {
        c.logfile.enable = true;
        c.logfile.path   = path.to_string_lossy().into_owned();
    });

    let mut exporter = LogExporter::new(&opts)?;
    exporter.start();
    exporter.add_record(&Flow::default(), false)?;
    exporter.add_record(&Flow::default(), true)?;
    exporter.stop();

    let data  = fs::read_to_string(&path)?;
    let lines = data.lines().collect::<Vec<_>>();
    assert_eq!(2, lines.len());

    for line in lines {
        let _: Flow = serde_json::from_str(line)?;
    }
    Ok(())
}

#[test]
fn logfile_follows_path_change() -> Result<()> {
    let dir   = TempDir::new()?;
    let first = dir.path().join("first.log");
    let next  = dir.path().join("next.log");

    let opts = options(|c| {
        c.logfile.enable = true;
        c.logfile.path   = first.to_string_lossy().into_owned();
    });

    let mut exporter = LogExporter::new(&opts)?;
    exporter.add_record(&Flow::default(), false)?;

    let opts = options(|c| {
        c.logfile.enable = true;
        c.logfile.path   = next.to_string_lossy().into_owned();
    });
    exporter.update_options(&opts);
    exporter.add_record(&Flow::default(), false)?;
    exporter.stop();

    assert_eq!(1, fs::read_to_string(&first)?.lines().count());
    assert_eq!(1, fs::read_to_string(&next)?.lines().count());
    Ok(())
}

#[test]
fn column_requires_address() {
    let opts = options(|_| ());
    assert!(ColumnExporter::new(Uuid::new_v4(), &opts).is_err());
}

#[test]
fn column_buffers_rows() -> Result<()> {
    let opts = options(|c| {
        c.database.enable  = true;
        c.database.address = "tcp://db:9000".to_owned();
    });

    let mut exporter = ColumnExporter::new(Uuid::new_v4(), &opts)?;
    exporter.start();
    exporter.add_record(&Flow::default(), false)?;
    exporter.add_record(&Flow::default(), false)?;
    exporter.stop();
    Ok(())
}

#[test]
fn bucket_batches_records() -> Result<()> {
    let opts = options(|c| {
        c.storage.enable = true;
        c.storage.bucket = "test-bucket-name".to_owned();
    });

    let mut exporter = BucketExporter::new(Uuid::new_v4(), &opts)?;
    exporter.start();
    exporter.add_record(&Flow::default(), false)?;
    exporter.stop();
    Ok(())
}

#[test]
fn ipfix_queues_only_when_started() -> Result<()> {
    let opts = options(|c| {
        c.collector.enable  = true;
        c.collector.address = "127.0.0.1:4739".to_owned();
    });

    let mut exporter = IpfixExporter::new(Uuid::new_v4(), "test-cluster", &opts)?;
    assert!(exporter.add_record(&Flow::default(), false).is_err());

    exporter.start();
    exporter.add_record(&Flow::default(), false)?;
    exporter.stop();

    assert!(exporter.add_record(&Flow::default(), false).is_err());
    Ok(())
}
