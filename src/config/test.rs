use std::fs;
use std::thread;
use std::time::Duration;
use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use tempfile::TempDir;
use super::config::*;
use super::watch;

#[test]
fn empty_file_yields_defaults() -> Result<()> {
    let config: Config = serde_json::from_str("{}")?;
    assert_eq!(Config::default(), config);

    let opts = Options::new(config)?;
    assert_eq!(Mode::Aggregate, opts.mode);
    assert_eq!(Duration::from_secs(60), opts.active);
    assert_eq!(Duration::from_secs(90), opts.inactive);
    Ok(())
}

#[test]
fn full_snapshot() -> Result<()> {
    let config: Config = serde_json::from_str(r#"{
        "mode":            "proxy",
        "listen":          "127.0.0.1:7071",
        "clusterId":       "test-cluster",
        "activeTimeout":   30,
        "inactiveTimeout": 45,
        "podLabels":       true,
        "collector":       { "enable": true, "address": "10.10.10.10:155", "transport": "tls" },
        "database":        { "enable": true, "address": "tcp://db:9000" },
        "storage":         { "enable": true, "bucket": "test-bucket-name" },
        "logfile":         { "enable": true, "path": "/tmp/sigma-flows.log" }
    }"#)?;

    let opts = Options::new(config)?;
    assert_eq!(Mode::Proxy, opts.mode);
    assert_eq!(Duration::from_secs(30), opts.active);
    assert_eq!("test-cluster", opts.config.cluster_id);
    assert!(opts.config.pod_labels);
    assert_eq!(Transport::Tls, opts.config.collector.transport);
    assert_eq!("test-bucket-name", opts.config.storage.bucket);
    assert_eq!("/tmp/sigma-flows.log", opts.config.logfile.path);
    Ok(())
}

#[test]
fn unknown_field_rejected() {
    let config = serde_json::from_str::<Config>(r#"{ "buffer": 10 }"#);
    assert!(config.is_err());
}

#[test]
fn storage_requires_valid_bucket() {
    let mut config = Config::default();
    config.storage.enable = true;
    assert!(Options::new(config.clone()).is_err());

    config.storage.bucket = "Bad_Bucket!".to_owned();
    assert!(Options::new(config.clone()).is_err());

    config.storage.bucket = "test-bucket-name".to_owned();
    assert!(Options::new(config).is_ok());
}

#[test]
fn collector_requires_address() {
    let mut config = Config::default();
    config.collector.enable = true;
    assert!(Options::new(config.clone()).is_err());

    config.collector.address = "10.10.10.10:155".to_owned();
    assert!(Options::new(config).is_ok());
}

#[test]
fn timeouts_must_be_non_zero() {
    let mut config = Config::default();
    config.active_timeout = 0;
    assert!(Options::new(config).is_err());
}

#[test]
fn listen_must_parse() {
    let mut config = Config::default();
    config.listen = "nonsense".to_owned();
    assert!(Options::new(config).is_err());
}

#[test]
fn unsupported_update_keys() -> Result<()> {
    let old = Options::new(Config::default())?;

    let mut config = Config::default();
    config.mode = Mode::Proxy;
    config.active_timeout = 30;
    let new = Options::new(config)?;

    assert_eq!(vec!["mode", "activeTimeout"], unsupported(&old, &new));
    assert!(unsupported(&old, &old).is_empty());
    Ok(())
}

#[test]
fn watch_detects_rewrite() -> Result<()> {
    let dir  = TempDir::new()?;
    let path = dir.path().join("sigma.config");
    fs::write(&path, "{}")?;

    let (tx, rx)        = bounded(100);
    let (stop_tx, stop) = bounded::<()>(0);

    let worker = {
        let path = path.clone();
        thread::spawn(move || watch(&path, &tx, &stop))
    };

    // give the watcher time to register before rewriting the file
    thread::sleep(Duration::from_millis(500));

    let mut config = Config::default();
    config.collector.enable  = true;
    config.collector.address = "10.10.10.10:155".to_owned();
    config.storage.enable    = true;
    config.storage.bucket    = "test-bucket-name".to_owned();
    fs::write(&path, serde_json::to_vec(&config)?)?;

    let opts = rx.recv_timeout(Duration::from_secs(5))?;
    assert!(opts.config.collector.enable);
    assert_eq!("10.10.10.10:155", opts.config.collector.address);
    assert_eq!("test-bucket-name", opts.config.storage.bucket);

    drop(stop_tx);
    worker.join().map_err(|_| anyhow!("watcher panicked"))?
}

#[test]
fn watch_skips_invalid_file() -> Result<()> {
    let dir  = TempDir::new()?;
    let path = dir.path().join("sigma.config");
    fs::write(&path, "{}")?;

    let (tx, rx)        = bounded(100);
    let (stop_tx, stop) = bounded::<()>(0);

    let worker = {
        let path = path.clone();
        thread::spawn(move || watch(&path, &tx, &stop))
    };

    thread::sleep(Duration::from_millis(500));
    fs::write(&path, "not json")?;

    assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());

    drop(stop_tx);
    worker.join().map_err(|_| anyhow!("watcher panicked"))?
}
