use std::path::{Path, PathBuf};
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender, select};
use crossbeam_channel::TrySendError::*;
use log::{debug, warn};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use super::Options;

/// Blocks on filesystem notifications for the configuration file and
/// pushes each successfully reloaded snapshot onto the update channel.
/// Returns when the stop channel closes; a slow consumer drops updates
/// rather than stalling the watcher.
pub fn watch(path: &Path, tx: &Sender<Options>, stop: &Receiver<()>) -> Result<()> {
    let (event_tx, event_rx) = unbounded();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        let _ = event_tx.send(event);
    })?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _                                        => Path::new("."),
    };
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    debug!("watching {:?} for configuration changes", path);

    loop {
        select! {
            recv(stop) -> _ => break,
            recv(event_rx) -> msg => {
                let event = match msg {
                    Ok(Ok(event)) => event,
                    Ok(Err(e))    => {
                        warn!("watch error: {}", e);
                        continue;
                    },
                    Err(_) => break,
                };

                if !relevant(&event, path) {
                    continue;
                }

                match Options::load(path) {
                    Ok(opts) => match tx.try_send(opts) {
                        Ok(())               => debug!("configuration update queued"),
                        Err(Full(_))         => warn!("update channel full"),
                        Err(Disconnected(_)) => break,
                    },
                    Err(e) => warn!("ignoring invalid configuration: {}", e),
                }
            },
        }
    }

    Ok(())
}

fn relevant(event: &Event, path: &Path) -> bool {
    let written = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => true,
        _                                           => false,
    };

    written && event.paths.iter().any(|p: &PathBuf| {
        p.file_name() == path.file_name()
    })
}
