//! Current-reactor context and the blocking drivers.

pub(crate) mod context;
mod driver;

pub use context::enter;
pub use driver::{wait_all, wait_any};
