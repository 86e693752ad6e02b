//! Core types: errors, configuration, request context.

pub mod config;
pub mod errors;
pub mod request;
