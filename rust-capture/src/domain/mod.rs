//! Domain layer for rust-capture.
//!
//! Capture specifications, the work items they expand into, and the value
//! objects shared by the orchestration components.

pub mod capture_spec;
pub mod template;
pub mod value_objects;
pub mod work_item;

pub use capture_spec::{
    CaptureKind, CaptureSpec, DataType, DependsOn, EndDate, FieldSelection, ParameterSpec,
};
pub use value_objects::*;
pub use work_item::{Address, WorkItem};
