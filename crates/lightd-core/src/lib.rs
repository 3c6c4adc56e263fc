//! # lightd-core
//! Foundation types for the lightd compact-block front end: the compact block
//! model, request/response shapes, address validation, node configuration
//! parsing, and the shared error taxonomy.

pub mod address;
pub mod compact;
pub mod conf;
pub mod constants;
pub mod error;
pub mod types;
