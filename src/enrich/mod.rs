pub use object::{Node, Pod, Service};
pub use store::{NodeStore, PodStore, ServiceStore, StaticStore};

mod object;
mod store;
