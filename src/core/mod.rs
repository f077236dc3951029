//! Core deployment logic — definitions, parameters, ordering, orchestration.

pub mod changeset;
pub mod driver;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod params;
pub mod parser;
pub mod poll;
pub mod settings;
pub mod types;
