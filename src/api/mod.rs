//! Purpose: Public Rust API boundary for widecol.
//! Exports: `TableFacade`, store connectors, configuration, and model types.
//! Role: Single import path for the CLI, the gateway server, and library callers.
//! Invariants: Wire models stay hidden from docs; they are shared only with the gateway server.

pub mod config;
mod facade;
mod rest;
#[doc(hidden)]
pub mod wire;

pub use crate::core::error::{Error, ErrorKind};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::filter::{CompareOp, Comparator, Filter, ListOperator};
pub use crate::core::memory::{MemoryBackend, MemoryConnector, MemoryStore};
pub use crate::core::model::{
    Cell, ColumnSelector, Columns, Durability, FamilyDescriptor, Put, Row, ScanSpec,
    TableDescriptor, TableName,
};
pub use crate::core::store::{ApiResult, Connector, RowScanner, Store};
pub use config::{RestConfig, StoreConfig};
pub use facade::{CreateOutcome, DeleteOutcome, ScannerOf, TableFacade};
pub use rest::{RestConnector, RestScanner, RestStore};
