//! Database plumbing: sqlx pools and their metrics.

pub mod pools;

pub use pools::DbPools;
