//! Domain value objects.

mod dedup;
mod retry_policy;

pub use dedup::{DedupKey, DedupPolicy};
pub use retry_policy::RetryPolicy;
