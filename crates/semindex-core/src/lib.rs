//! semindex-core
//!
//! Configuration, error taxonomy, domain types and the provider/exclusion
//! seams shared by the store, indexer and retriever crates.

pub mod config;
pub mod error;
pub mod hash;
pub mod paths;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
