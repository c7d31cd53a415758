//! Purpose: Define the handle contract every backing store implements.
//! Exports: `ApiResult`, `Connector`, `Store`, `RowScanner`.
//! Role: Seam between the facade and the external store; test doubles plug in here.
//! Invariants: Stores own durability, consistency, and scan ordering; callers never re-sort.
//! Invariants: Scanners release server-side state on `close` or drop.

use crate::core::error::Error;
use crate::core::model::{ColumnSelector, Put, Row, ScanSpec, TableDescriptor, TableName};

pub type ApiResult<T> = Result<T, Error>;

/// Opens handles from store configuration.
pub trait Connector {
    type Handle: Store;

    /// Fails with `ErrorKind::Connection` when the store cannot be reached.
    fn connect(&self) -> ApiResult<Self::Handle>;
}

/// An open connection plus its admin surface.
pub trait Store {
    type Scanner: RowScanner;

    fn table_exists(&self, table: &TableName) -> ApiResult<bool>;

    fn create_table(&self, descriptor: &TableDescriptor) -> ApiResult<()>;

    fn enable_table(&self, table: &TableName) -> ApiResult<()>;

    fn disable_table(&self, table: &TableName) -> ApiResult<()>;

    /// Drops a table. The table must already be disabled.
    fn delete_table(&self, table: &TableName) -> ApiResult<()>;

    fn list_tables(&self) -> ApiResult<Vec<TableName>>;

    fn describe_table(&self, table: &TableName) -> ApiResult<TableDescriptor>;

    /// Applies the puts as one batch. Not atomic across rows.
    fn put(&self, table: &TableName, puts: &[Put]) -> ApiResult<()>;

    /// Deletes whole rows. Not atomic across rows.
    fn delete(&self, table: &TableName, keys: &[Vec<u8>]) -> ApiResult<()>;

    fn get(&self, table: &TableName, key: &[u8], columns: &ColumnSelector)
    -> ApiResult<Option<Row>>;

    fn scan(&self, table: &TableName, spec: &ScanSpec) -> ApiResult<Self::Scanner>;

    /// Releases the handle, reporting every resource that failed to close.
    fn close(self) -> ApiResult<()>
    where
        Self: Sized;
}

/// Lazy, key-ordered row cursor.
pub trait RowScanner: Iterator<Item = ApiResult<Row>> {
    fn close(&mut self) -> ApiResult<()>;
}
