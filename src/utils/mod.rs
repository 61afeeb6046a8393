//! Shared utilities for the roamgraph exploration engine.

pub mod canonical;
