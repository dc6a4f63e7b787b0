pub mod chains;
pub mod client;

pub use chains::ChainRegistry;
pub use client::{BrokerClient, CacheClient, Client, ClientRegistry, ClientSubset, RelationalClient};
