//! Resume-store backends: a Redis-backed sorted set for multi-process
//! deployments, and an in-memory ring as fallback and local mirror.

mod memory;
mod redis_backend;
mod traits;

pub use memory::InMemoryResumeStore;
pub use redis_backend::RedisResumeStore;
pub use traits::{ResumeStats, ResumeStore};
