// Core modules: data model, filters, store contract, error modeling, in-memory store.
pub mod error;
pub mod filter;
pub mod memory;
pub mod model;
pub mod store;
