//! Purpose: In-process implementation of the store contract.
//! Exports: `MemoryBackend`, `MemoryConnector`, `MemoryStore`, `MemoryScanner`.
//! Role: Reference semantics for tests and the backing store of `widecol serve`.
//! Invariants: Tables must be disabled before deletion; disabled tables reject data ops.
//! Invariants: Each put gets one timestamp, strictly increasing per backend.
//! Invariants: Scanners snapshot the requested key range when opened.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::filter::RowMatcher;
use crate::core::model::{Cell, ColumnSelector, Put, Row, ScanSpec, TableDescriptor, TableName};
use crate::core::store::{ApiResult, Connector, RowScanner, Store};

type ColumnMap = BTreeMap<(String, Vec<u8>), (Vec<u8>, u64)>;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    unavailable: AtomicBool,
}

#[derive(Debug, Default)]
struct BackendState {
    tables: BTreeMap<TableName, MemTable>,
    last_timestamp: u64,
}

#[derive(Debug)]
struct MemTable {
    descriptor: TableDescriptor,
    rows: BTreeMap<Vec<u8>, ColumnMap>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulates the store going away (or coming back). While unavailable every
    /// connect and handle call fails with `ErrorKind::Connection`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn lock(&self) -> ApiResult<MutexGuard<'_, BackendState>> {
        if !self.is_available() {
            return Err(Error::new(ErrorKind::Connection).with_message("memory store is unavailable"));
        }
        self.state
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("memory store lock poisoned"))
    }
}

#[derive(Clone, Debug)]
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            backend: MemoryBackend::new(),
        }
    }

    pub fn with_backend(backend: Arc<MemoryBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    type Handle = MemoryStore;

    fn connect(&self) -> ApiResult<MemoryStore> {
        if !self.backend.is_available() {
            return Err(Error::new(ErrorKind::Connection)
                .with_message("failed to connect to memory store")
                .with_hint("The backend was marked unavailable."));
        }
        tracing::debug!("opened memory store handle");
        Ok(MemoryStore {
            backend: self.backend.clone(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct MemoryStore {
    backend: Arc<MemoryBackend>,
}

impl MemoryStore {
    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }
}

impl BackendState {
    fn table(&self, name: &TableName) -> ApiResult<&MemTable> {
        self.tables.get(name).ok_or_else(|| table_not_found(name))
    }

    fn table_mut(&mut self, name: &TableName) -> ApiResult<&mut MemTable> {
        self.tables.get_mut(name).ok_or_else(|| table_not_found(name))
    }

    fn enabled_table(&self, name: &TableName) -> ApiResult<&MemTable> {
        let table = self.table(name)?;
        table.ensure_enabled()?;
        Ok(table)
    }

    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }
}

impl MemTable {
    fn ensure_enabled(&self) -> ApiResult<()> {
        if self.descriptor.is_enabled() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Schema)
                .with_message("table is disabled")
                .with_table(self.descriptor.name().as_str()))
        }
    }

    fn ensure_family(&self, family: &str) -> ApiResult<()> {
        if self.descriptor.family(family).is_some() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Schema)
                .with_message(format!("no such column family '{family}'"))
                .with_table(self.descriptor.name().as_str()))
        }
    }

    fn ensure_selector(&self, columns: &ColumnSelector) -> ApiResult<()> {
        match columns.family() {
            Some(family) => self.ensure_family(family),
            None => Ok(()),
        }
    }
}

fn table_not_found(name: &TableName) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("table not found")
        .with_table(name.as_str())
}

fn build_row(key: &[u8], columns: &ColumnMap, selector: &ColumnSelector) -> Row {
    let cells = columns
        .iter()
        .filter(|((family, qualifier), _)| selector.matches(family, qualifier))
        .map(|((family, qualifier), (value, timestamp))| Cell {
            row: key.to_vec(),
            family: family.clone(),
            qualifier: qualifier.clone(),
            value: value.clone(),
            timestamp: *timestamp,
        })
        .collect();
    Row {
        key: key.to_vec(),
        cells,
    }
}

impl Store for MemoryStore {
    type Scanner = MemoryScanner;

    fn table_exists(&self, table: &TableName) -> ApiResult<bool> {
        let state = self.backend.lock()?;
        Ok(state.tables.contains_key(table))
    }

    fn create_table(&self, descriptor: &TableDescriptor) -> ApiResult<()> {
        let mut state = self.backend.lock()?;
        let name = descriptor.name().clone();
        if state.tables.contains_key(&name) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("table already exists")
                .with_table(name.as_str()));
        }
        let table = MemTable {
            descriptor: descriptor.clone().with_enabled(true),
            rows: BTreeMap::new(),
        };
        state.tables.insert(name, table);
        tracing::debug!(table = %descriptor.name(), "created table");
        Ok(())
    }

    fn enable_table(&self, table: &TableName) -> ApiResult<()> {
        let mut state = self.backend.lock()?;
        let entry = state.table_mut(table)?;
        entry.descriptor = entry.descriptor.clone().with_enabled(true);
        Ok(())
    }

    fn disable_table(&self, table: &TableName) -> ApiResult<()> {
        let mut state = self.backend.lock()?;
        let entry = state.table_mut(table)?;
        entry.descriptor = entry.descriptor.clone().with_enabled(false);
        Ok(())
    }

    fn delete_table(&self, table: &TableName) -> ApiResult<()> {
        let mut state = self.backend.lock()?;
        if state.table(table)?.descriptor.is_enabled() {
            return Err(Error::new(ErrorKind::Schema)
                .with_message("table must be disabled before it can be deleted")
                .with_table(table.as_str()));
        }
        state.tables.remove(table);
        tracing::debug!(table = %table, "deleted table");
        Ok(())
    }

    fn list_tables(&self) -> ApiResult<Vec<TableName>> {
        let state = self.backend.lock()?;
        Ok(state.tables.keys().cloned().collect())
    }

    fn describe_table(&self, table: &TableName) -> ApiResult<TableDescriptor> {
        let state = self.backend.lock()?;
        Ok(state.table(table)?.descriptor.clone())
    }

    fn put(&self, table: &TableName, puts: &[Put]) -> ApiResult<()> {
        let mut state = self.backend.lock()?;
        {
            let entry = state.enabled_table(table)?;
            for put in puts {
                if put.key.is_empty() {
                    return Err(Error::new(ErrorKind::Argument)
                        .with_message("row key must not be empty")
                        .with_table(table.as_str()));
                }
                if put.columns.is_empty() {
                    return Err(Error::new(ErrorKind::Argument)
                        .with_message("put has no columns")
                        .with_table(table.as_str())
                        .with_row(put.key.clone()));
                }
                for family in put.columns.families() {
                    entry
                        .ensure_family(family)
                        .map_err(|err| err.with_row(put.key.clone()))?;
                }
            }
        }
        for put in puts {
            let timestamp = state.next_timestamp();
            tracing::trace!(
                table = %table,
                row = %put.key.as_bstr(),
                durability = put.durability.effective().as_str(),
                "applying put"
            );
            let entry = state.table_mut(table)?;
            let columns = entry.rows.entry(put.key.clone()).or_default();
            for (family, qualifier, value) in put.columns.iter() {
                columns.insert(
                    (family.to_string(), qualifier.to_vec()),
                    (value.to_vec(), timestamp),
                );
            }
        }
        Ok(())
    }

    fn delete(&self, table: &TableName, keys: &[Vec<u8>]) -> ApiResult<()> {
        let mut state = self.backend.lock()?;
        state.enabled_table(table)?;
        let entry = state.table_mut(table)?;
        for key in keys {
            entry.rows.remove(key);
        }
        Ok(())
    }

    fn get(
        &self,
        table: &TableName,
        key: &[u8],
        columns: &ColumnSelector,
    ) -> ApiResult<Option<Row>> {
        let state = self.backend.lock()?;
        let entry = state.enabled_table(table)?;
        entry.ensure_selector(columns)?;
        let row = entry
            .rows
            .get(key)
            .map(|stored| build_row(key, stored, columns))
            .filter(|row| !row.is_empty());
        Ok(row)
    }

    fn scan(&self, table: &TableName, spec: &ScanSpec) -> ApiResult<MemoryScanner> {
        let state = self.backend.lock()?;
        let entry = state.enabled_table(table)?;
        entry.ensure_selector(&spec.columns)?;

        let lower = spec
            .start
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Included);
        let rows: Vec<Row> = entry
            .rows
            .range::<[u8], _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| spec.contains_key(key.as_slice()))
            .map(|(key, stored)| build_row(key, stored, &spec.columns))
            .filter(|row| !row.is_empty())
            .collect();
        tracing::debug!(table = %table, rows = rows.len(), "opened memory scanner");
        Ok(MemoryScanner {
            pending: rows.into_iter(),
            matcher: spec.filter.as_ref().map(RowMatcher::new),
        })
    }

    fn close(self) -> ApiResult<()> {
        tracing::debug!("closed memory store handle");
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryScanner {
    pending: std::vec::IntoIter<Row>,
    matcher: Option<RowMatcher>,
}

impl Iterator for MemoryScanner {
    type Item = ApiResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        for row in self.pending.by_ref() {
            let row = match self.matcher.as_mut() {
                Some(matcher) => matcher.apply(row),
                None => Some(row),
            };
            if let Some(row) = row {
                return Some(Ok(row));
            }
        }
        None
    }
}

impl RowScanner for MemoryScanner {
    fn close(&mut self) -> ApiResult<()> {
        self.pending = Vec::new().into_iter();
        Ok(())
    }
}
