//! Purpose: Table administration and data access over one owned store handle.
//! Exports: `TableFacade`, `CreateOutcome`, `DeleteOutcome`, `ScannerOf`.
//! Role: The public entry point used by the CLI and by library callers.
//! Invariants: At most one live handle per facade, opened lazily and closed explicitly.
//! Invariants: Every operation is a single passthrough to the store; nothing is cached.
//! Invariants: Blank table names or row keys make `get_row` return no cells.

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::filter::Filter;
use crate::core::model::{
    Cell, ColumnSelector, Columns, Durability, Put, ScanSpec, TableDescriptor, TableName,
};
use crate::core::store::{ApiResult, Connector, Store};

/// Scanner type produced by a facade over connector `C`.
pub type ScannerOf<C> = <<C as Connector>::Handle as Store>::Scanner;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    Missing,
}

#[derive(Debug)]
pub struct TableFacade<C: Connector> {
    connector: C,
    handle: Option<C::Handle>,
}

impl<C: Connector> TableFacade<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            handle: None,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the open handle, connecting first if needed.
    pub fn connect(&mut self) -> ApiResult<&C::Handle> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => {
                let handle = self.connector.connect()?;
                tracing::debug!("store handle opened");
                handle
            }
        };
        let handle: &C::Handle = self.handle.insert(handle);
        Ok(handle)
    }

    pub fn table_exists(&mut self, table: &str) -> ApiResult<bool> {
        let name = TableName::parse(table)?;
        self.connect()?.table_exists(&name)
    }

    /// Creates the table with one family per name unless it already exists.
    pub fn create_table<S: AsRef<str>>(
        &mut self,
        table: &str,
        families: &[S],
    ) -> ApiResult<CreateOutcome> {
        let name = TableName::parse(table)?;
        let descriptor = TableDescriptor::from_family_names(name.clone(), families)?;
        let store = self.connect()?;
        if store.table_exists(&name)? {
            tracing::info!(table = %name, "table already exists; skipping create");
            return Ok(CreateOutcome::AlreadyExists);
        }
        match store.create_table(&descriptor) {
            Ok(()) => {
                tracing::info!(table = %name, families = descriptor.families().len(), "created table");
                Ok(CreateOutcome::Created)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tracing::info!(table = %name, "table created concurrently; skipping create");
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }

    /// Disables and then drops the table if it exists.
    pub fn delete_table(&mut self, table: &str) -> ApiResult<DeleteOutcome> {
        let name = TableName::parse(table)?;
        let store = self.connect()?;
        if !store.table_exists(&name)? {
            tracing::info!(table = %name, "table does not exist; skipping delete");
            return Ok(DeleteOutcome::Missing);
        }
        store.disable_table(&name)?;
        store.delete_table(&name)?;
        tracing::info!(table = %name, "deleted table");
        Ok(DeleteOutcome::Deleted)
    }

    pub fn enable_table(&mut self, table: &str) -> ApiResult<()> {
        let name = TableName::parse(table)?;
        self.connect()?.enable_table(&name)
    }

    pub fn put_one(
        &mut self,
        table: &str,
        key: impl Into<Vec<u8>>,
        columns: Columns,
        durability: Durability,
    ) -> ApiResult<()> {
        let name = TableName::parse(table)?;
        let put = Put::new(key, columns).with_durability(durability);
        ensure_key(&name, &put.key)?;
        self.connect()?.put(&name, std::slice::from_ref(&put))
    }

    /// Submits every put as one batch. Rows are not applied atomically.
    pub fn put_many(&mut self, table: &str, rows: Vec<Put>) -> ApiResult<()> {
        let name = TableName::parse(table)?;
        if rows.is_empty() {
            return Ok(());
        }
        for put in &rows {
            ensure_key(&name, &put.key)?;
        }
        tracing::debug!(table = %name, rows = rows.len(), "submitting put batch");
        self.connect()?.put(&name, &rows)
    }

    pub fn delete_row(&mut self, table: &str, key: &[u8]) -> ApiResult<()> {
        let name = TableName::parse(table)?;
        ensure_key(&name, key)?;
        self.connect()?.delete(&name, &[key.to_vec()])
    }

    pub fn delete_rows(&mut self, table: &str, keys: &[Vec<u8>]) -> ApiResult<()> {
        let name = TableName::parse(table)?;
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            ensure_key(&name, key)?;
        }
        self.connect()?.delete(&name, keys)
    }

    /// Cells of one row, optionally restricted to a family or a single column.
    ///
    /// A qualifier without a family is ignored. A missing row yields no cells.
    pub fn get_row(
        &mut self,
        table: &str,
        key: &[u8],
        family: Option<&str>,
        qualifier: Option<&[u8]>,
    ) -> ApiResult<Vec<Cell>> {
        if table.trim().is_empty() || key.is_empty() {
            return Ok(Vec::new());
        }
        let name = TableName::parse(table)?;
        let selector = ColumnSelector::from_parts(family, qualifier);
        let row = self.connect()?.get(&name, key, &selector)?;
        Ok(row.map(|row| row.cells).unwrap_or_default())
    }

    /// Rows in `[start, stop)`; either bound may be open.
    pub fn scan_range(
        &mut self,
        table: &str,
        family: Option<&str>,
        qualifier: Option<&[u8]>,
        start: Option<&[u8]>,
        stop: Option<&[u8]>,
    ) -> ApiResult<ScannerOf<C>> {
        let mut spec = ScanSpec::new().with_columns(ColumnSelector::from_parts(family, qualifier));
        if let Some(start) = start {
            spec = spec.with_start(start);
        }
        if let Some(stop) = stop {
            spec = spec.with_stop(stop);
        }
        self.scan(table, &spec)
    }

    pub fn scan_with_filter(&mut self, table: &str, filter: Filter) -> ApiResult<ScannerOf<C>> {
        self.scan(table, &ScanSpec::new().with_filter(filter))
    }

    pub fn scan_all(&mut self, table: &str) -> ApiResult<ScannerOf<C>> {
        self.scan(table, &ScanSpec::new())
    }

    pub fn scan(&mut self, table: &str, spec: &ScanSpec) -> ApiResult<ScannerOf<C>> {
        let name = TableName::parse(table)?;
        self.connect()?.scan(&name, spec)
    }

    /// Table names in ascending order.
    pub fn list_table_names(&mut self) -> ApiResult<Vec<String>> {
        let mut names: Vec<String> = self
            .connect()?
            .list_tables()?
            .into_iter()
            .map(|name| name.as_str().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn describe_table(&mut self, table: &str) -> ApiResult<TableDescriptor> {
        let name = TableName::parse(table)?;
        self.connect()?.describe_table(&name)
    }

    /// Releases the handle. A facade that never connected closes trivially.
    pub fn close(&mut self) -> ApiResult<()> {
        match self.handle.take() {
            Some(handle) => {
                handle.close()?;
                tracing::debug!("store handle closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn ensure_key(table: &TableName, key: &[u8]) -> ApiResult<()> {
    if key.is_empty() {
        return Err(Error::new(ErrorKind::Argument)
            .with_message("row key must not be empty")
            .with_table(table.as_str()));
    }
    tracing::trace!(table = %table, row = %key.as_bstr(), "row key accepted");
    Ok(())
}
