//! Review: everything shown to (or asked of) the operator before execution.

pub mod changes;
pub mod confirm;
pub mod diff;
