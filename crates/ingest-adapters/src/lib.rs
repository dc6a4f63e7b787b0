//! ingest-adapters: concrete connections to the broker, relational
//! database, and cache back ends, implementing the capability traits
//! `ingest-core` defines.

pub mod broker;
pub mod cache;
pub mod errors;
pub mod relational;

pub use broker::RumqttcBroker;
pub use cache::RedisCache;
pub use relational::SqlxRelational;
