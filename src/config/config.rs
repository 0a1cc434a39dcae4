use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use anyhow::{anyhow, Result};
use serde::{Serialize, Deserialize};

/// On-disk configuration snapshot. Unknown fields are rejected so a
/// typo cannot silently disable a sink.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    pub mode:             Mode,
    pub listen:           String,
    pub cluster_id:       String,
    pub active_timeout:   u64,
    pub inactive_timeout: u64,
    pub pod_labels:       bool,
    pub collector:        Collector,
    pub database:         Database,
    pub storage:          Storage,
    pub logfile:          Logfile,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Aggregate,
    Proxy,
}

/// The downstream flow collector this aggregator exports to.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Collector {
    pub enable:    bool,
    pub address:   String,
    pub transport: Transport,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
    Tls,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Database {
    pub enable:  bool,
    pub address: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Storage {
    pub enable: bool,
    pub bucket: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Logfile {
    pub enable: bool,
    pub path:   String,
}

/// Validated, immutable snapshot of the full configuration. Replacing
/// the orchestrator's active Options is the unit of reconfiguration.
#[derive(Clone, Debug)]
pub struct Options {
    pub mode:     Mode,
    pub active:   Duration,
    pub inactive: Duration,
    pub config:   Config,
}

impl Options {
    pub fn load(path: &Path) -> Result<Options> {
        let data = fs::read(path)?;
        let config = serde_json::from_slice(&data)?;
        Options::new(config)
    }

    pub fn new(config: Config) -> Result<Options> {
        config.listen.parse::<SocketAddr>().map_err(|e| {
            anyhow!("invalid listen address '{}': {}", config.listen, e)
        })?;

        if config.active_timeout == 0 || config.inactive_timeout == 0 {
            return Err(anyhow!("flow record timeouts must be non-zero"));
        }
        if config.collector.enable && config.collector.address.is_empty() {
            return Err(anyhow!("collector enabled without an address"));
        }
        if config.database.enable && config.database.address.is_empty() {
            return Err(anyhow!("database enabled without an address"));
        }
        if config.storage.enable {
            bucket(&config.storage.bucket)?;
        }
        if config.logfile.enable && config.logfile.path.is_empty() {
            return Err(anyhow!("logfile enabled without a path"));
        }

        Ok(Options {
            mode:     config.mode,
            active:   Duration::from_secs(config.active_timeout),
            inactive: Duration::from_secs(config.inactive_timeout),
            config:   config,
        })
    }
}

/// Names of fields that differ between two snapshots but cannot be
/// applied without a restart.
pub fn unsupported(old: &Options, new: &Options) -> Vec<&'static str> {
    let mut keys = Vec::new();
    if new.mode != old.mode {
        keys.push("mode");
    }
    if new.config.listen != old.config.listen {
        keys.push("listen");
    }
    if new.active != old.active {
        keys.push("activeTimeout");
    }
    if new.inactive != old.inactive {
        keys.push("inactiveTimeout");
    }
    if new.config.cluster_id != old.config.cluster_id {
        keys.push("clusterId");
    }
    keys
}

fn bucket(name: &str) -> Result<()> {
    let valid = (3..=63).contains(&name.len())
        && name.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.'
        });

    match valid {
        true  => Ok(()),
        false => Err(anyhow!("invalid bucket name '{}'", name)),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode:             Mode::Aggregate,
            listen:           "0.0.0.0:7071".to_owned(),
            cluster_id:       String::new(),
            active_timeout:   60,
            inactive_timeout: 90,
            pod_labels:       false,
            collector:        Collector::default(),
            database:         Database::default(),
            storage:          Storage::default(),
            logfile:          Logfile::default(),
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Aggregate
    }
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Tcp
    }
}
