use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use anyhow::Result;
use log::{debug, error};
use crate::aggregate::Flow;
use crate::config::Options;
use super::Exporter;

/// Appends each record as one JSON line to a local file.
pub struct LogExporter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl LogExporter {
    pub fn new(opts: &Options) -> Result<Self> {
        let path = PathBuf::from(&opts.config.logfile.path);
        let file = open(&path)?;
        Ok(Self {
            path: path,
            file: file,
        })
    }
}

impl Exporter for LogExporter {
    fn start(&mut self) {
        debug!("logfile exporter to {:?}", self.path);
    }

    fn stop(&mut self) {
        if let Err(e) = self.file.flush() {
            error!("failed to flush {:?}: {}", self.path, e);
        }
    }

    fn update_options(&mut self, opts: &Options) {
        let path = PathBuf::from(&opts.config.logfile.path);
        if path == self.path {
            return;
        }

        match open(&path) {
            Ok(file) => {
                let _ = self.file.flush();
                self.file = file;
                self.path = path;
                debug!("logfile exporter now {:?}", self.path);
            },
            Err(e) => error!("keeping {:?}, cannot open {:?}: {}", self.path, path, e),
        }
    }

    fn add_record(&mut self, flow: &Flow, _ipv6: bool) -> Result<()> {
        serde_json::to_writer(&mut self.file, flow)?;
        self.file.write_all(b"\n")?;
        Ok(())
    }
}

fn open(path: &PathBuf) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}
