//! Repository layer for database access.
//!
//! Each repository is a trait with a SQLx implementation holding a read
//! pool and the serialized write pool.

pub mod capture_spec;
pub mod dedup;
pub mod work_queue;

pub use capture_spec::*;
pub use dedup::*;
pub use work_queue::*;
