//! The periodic part: list scripts, reconcile the cache, run entry points.

pub mod cache;
pub mod driver;
pub mod scheduler;
pub mod source;

pub use driver::CycleDriver;
