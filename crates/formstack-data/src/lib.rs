//! Data-driven setup for formstack: schema catalogs and load orders read
//! from RON, TOML or JSON files.

pub mod catalog;
pub mod loader;
pub mod schema;

pub use catalog::{load_catalog, register_catalog};
pub use loader::{load_stack, DataLoadError};
