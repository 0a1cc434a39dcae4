pub use metrics::Metrics;
pub use run::Aggregator;

mod metrics;
mod run;
