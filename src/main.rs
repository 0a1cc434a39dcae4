use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use anyhow::Result;
use clap::{App, load_yaml, value_t};
use crossbeam_channel::bounded;
use env_logger::Builder;
use jemallocator::Jemalloc;
use log::info;
use log::LevelFilter::*;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use uuid::Uuid;
use sigma::enrich::StaticStore;
use sigma::export::Factories;
use sigma::run::Aggregator;

#[global_allocator]
static ALLOC: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    let yaml = load_yaml!("args.yml");
    let ver  = env!("CARGO_PKG_VERSION");
    let args = App::from_yaml(&yaml).version(ver).get_matches();

    let config = value_t!(args, "config", PathBuf)?;

    let (module, level) = match args.occurrences_of("verbose") {
        0 => (Some(module_path!()), Info),
        1 => (Some(module_path!()), Debug),
        2 => (Some(module_path!()), Trace),
        _ => (None,                 Trace),
    };
    Builder::from_default_env().filter(module, level).init();

    info!("initializing sigma {}", ver);

    let (stop_tx, stop_rx) = bounded::<()>(0);
    let mut signals = Signals::new(&[SIGTERM, SIGINT])?;
    thread::spawn(move || {
        signals.forever().next();
        info!("shutdown signal received");
        drop(stop_tx);
    });

    let store = Arc::new(StaticStore::new());

    let aggregator = Aggregator::new(
        &config,
        Uuid::new_v4(),
        store.clone(),
        store.clone(),
        store,
        Factories::default(),
    )?;

    aggregator.run(stop_rx)
}
