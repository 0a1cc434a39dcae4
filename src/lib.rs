pub mod aggregate;
pub mod collect;
pub mod config;
pub mod enrich;
pub mod export;
pub mod run;
