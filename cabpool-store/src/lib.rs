//! Infrastructure adapters: the Redis-backed pool, the Postgres trip store,
//! the pub/sub notification bus, and layered configuration.

pub mod app_config;
pub mod bus;
pub mod database;
pub mod pool;
pub mod trips;

pub use app_config::Config;
pub use bus::{RedisBus, Subscription};
pub use database::DbClient;
pub use pool::RedisPool;
pub use trips::PgTripStore;
