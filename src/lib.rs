//! stax — declarative stack deployments through reviewed change sets.
//!
//! Stack definitions are discovered from YAML, ordered by their declared
//! dependencies, and deployed one at a time: every change is staged as a
//! deterministically named change set, shown to the operator, and only then
//! executed.

pub mod cli;
pub mod core;
pub mod provenance;
pub mod remote;
pub mod review;
