mod redis_pool;

pub use redis_pool::{PoolStats, RedisConnection, RedisConnectionPool, RedisPoolConfig};
