//! Database models for rust-capture.
//!
//! These models map directly to the database schema. JSON columns are kept
//! as strings here and decoded into domain types at the edges.

pub mod capture_spec;
pub mod dedup;
pub mod work_queue;

pub use capture_spec::*;
pub use dedup::*;
pub use work_queue::*;
