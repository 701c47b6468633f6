//! Core types: errors, configuration, domain model.

pub mod config;
pub mod errors;
pub mod model;
