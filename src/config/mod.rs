pub use config::{Config, Mode, Options, Transport, unsupported};
pub use watch::watch;

mod config;
mod watch;

#[cfg(test)]
mod test;
