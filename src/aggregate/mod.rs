pub use aggregate::{Process, Record};
pub use flow::{Addr, Flow, Key, Kind, Kube, Point, Stats};

mod aggregate;
pub mod flow;

#[cfg(test)]
mod test;
