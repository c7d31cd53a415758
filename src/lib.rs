//! Purpose: Library crate behind the `widecol` CLI and integration tests.
//! Exports: `api` (facade, config, REST client), `core` (model, filters, store contract, errors), `notice`.
//! Role: Minimal administrative and data-access facade over a wide-column store.
//! Invariants: Store access always goes through `api::TableFacade` or a `core::store::Store` handle.
pub mod api;
pub mod core;
pub mod notice;
