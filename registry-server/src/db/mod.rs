//! Database module: connection pool management for the PostgreSQL-backed
//! registry engine.

mod pool;

pub use pool::*;
