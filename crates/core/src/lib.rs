//! Core business logic for mediashelf.

pub mod services;

pub use services::*;
