pub mod connection;
pub mod http;
pub mod inventory;
pub mod stats;

pub use connection::{ConnectionManager, NetError};
pub use inventory::UrlInventoryDiscovery;
pub use stats::ConnectionStats;
