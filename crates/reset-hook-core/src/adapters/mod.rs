//! # In-Memory Adapters
//!
//! In-process implementations of the core capability traits for tests and
//! local development.

pub mod memory_secret_store;

pub use memory_secret_store::InMemorySecretStore;
