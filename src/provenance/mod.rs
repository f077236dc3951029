//! Provenance: deterministic change set naming and the deployment event log.

pub mod eventlog;
pub mod hasher;
