//! Purpose: Store handle backed by an HBase-style REST gateway (JSON bodies).
//! Exports: `RestConnector`, `RestStore`, `RestScanner`.
//! Role: Production implementation of the store contract over HTTP.
//! Invariants: Row-addressed requests (get, delete) need UTF-8 row keys that cannot be mistaken
//! for a table sub-resource; puts and scans are binary-safe.
//! Invariants: Open scanners are tracked and released on scanner close, drop, or store close.
//! Invariants: A row split across scanner batches is emitted once, merged.
#![allow(clippy::result_large_err)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use bstr::ByteSlice;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::config::RestConfig;
use super::wire::{CellSet, ErrorEnvelope, ScannerRequest, TableList, TableSchema, VersionInfo};
use crate::core::error::{Error, ErrorKind};
use crate::core::model::{ColumnSelector, Durability, Put, Row, ScanSpec, TableDescriptor, TableName};
use crate::core::store::{ApiResult, Connector, RowScanner, Store};

/// Path segment used for batched puts; row keys travel in the body.
const MULTI_PUT_SEGMENT: &str = "$multiput";

/// Segments after `/{table}/` that the gateway routes to something other than a row.
const RESERVED_ROW_SEGMENTS: [&str; 7] = [
    ".",
    "..",
    "schema",
    "exists",
    "scanner",
    "regions",
    MULTI_PUT_SEGMENT,
];

#[derive(Clone, Debug)]
pub struct RestConnector {
    config: RestConfig,
}

impl RestConnector {
    pub fn new(config: RestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }
}

impl Connector for RestConnector {
    type Handle = RestStore;

    /// Opens a client and probes `GET /version` so unreachable gateways fail here.
    fn connect(&self) -> ApiResult<RestStore> {
        let agent = ureq::AgentBuilder::new()
            .timeout(self.config.timeout)
            .build();
        let store = RestStore {
            inner: Arc::new(RestInner {
                base_url: self.config.base_url.clone(),
                token: self.config.token.clone(),
                scanner_batch: self.config.scanner_batch,
                agent,
                open_scanners: Mutex::new(BTreeSet::new()),
            }),
        };
        let url = store.url(&["version"])?;
        let version: VersionInfo = store.request_json::<(), _>("GET", &url, None)?;
        tracing::debug!(
            base_url = %self.config.base_url,
            server = %version.server,
            rest = %version.rest,
            "connected to gateway"
        );
        Ok(store)
    }
}

#[derive(Clone, Debug)]
pub struct RestStore {
    inner: Arc<RestInner>,
}

#[derive(Debug)]
struct RestInner {
    base_url: Url,
    token: Option<String>,
    scanner_batch: u32,
    agent: ureq::Agent,
    open_scanners: Mutex<BTreeSet<String>>,
}

impl RestStore {
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Locations of scanners opened by this store and not yet released.
    pub fn open_scanner_count(&self) -> usize {
        self.inner
            .open_scanners
            .lock()
            .map(|set| set.len())
            .unwrap_or(0)
    }

    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        build_url(&self.inner.base_url, segments)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let mut request = self.inner.agent.request(method, url.as_str());
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
    }

    fn send<T: Serialize>(
        &self,
        method: &str,
        url: &Url,
        body: Option<&T>,
    ) -> ApiResult<ureq::Response> {
        tracing::trace!(method, url = %url, "gateway request");
        let request = self.request(method, url).set("Accept", "application/json");
        let response = match body {
            None => request.call(),
            Some(body) => {
                let payload = serde_json::to_string(body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
        };
        match response {
            Ok(resp) => Ok(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Connection)
                .with_message("gateway request failed")
                .with_hint("Check that the gateway is running and reachable.")
                .with_source(err)),
        }
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: Option<&T>) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        read_json_response(self.send(method, url, body)?)
    }

    fn release_scanner(&self, location: &str) -> ApiResult<()> {
        let url = Url::parse(location).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("invalid scanner location")
                .with_source(err)
        })?;
        match self.send::<()>("DELETE", &url, None) {
            Ok(_) => {}
            // The gateway may have expired the scanner already.
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        self.untrack(location);
        tracing::debug!(location, "released scanner");
        Ok(())
    }

    fn track(&self, location: &str) {
        if let Ok(mut set) = self.inner.open_scanners.lock() {
            set.insert(location.to_string());
        }
    }

    fn untrack(&self, location: &str) {
        if let Ok(mut set) = self.inner.open_scanners.lock() {
            set.remove(location);
        }
    }
}

impl Store for RestStore {
    type Scanner = RestScanner;

    fn table_exists(&self, table: &TableName) -> ApiResult<bool> {
        let url = self.url(&[table.as_str(), "exists"])?;
        match self.send::<()>("GET", &url, None) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.with_table(table.as_str())),
        }
    }

    fn create_table(&self, descriptor: &TableDescriptor) -> ApiResult<()> {
        let name = descriptor.name();
        let url = self.url(&[name.as_str(), "schema"])?;
        let schema = TableSchema::from_descriptor(descriptor);
        self.send("PUT", &url, Some(&schema))
            .map_err(|err| err.with_table(name.as_str()))?;
        Ok(())
    }

    fn enable_table(&self, table: &TableName) -> ApiResult<()> {
        if !self.table_exists(table)? {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("table not found")
                .with_table(table.as_str()));
        }
        tracing::debug!(table = %table, "gateway manages table state; enable is a no-op");
        Ok(())
    }

    fn disable_table(&self, table: &TableName) -> ApiResult<()> {
        tracing::debug!(table = %table, "gateway disables on schema delete; disable is a no-op");
        Ok(())
    }

    fn delete_table(&self, table: &TableName) -> ApiResult<()> {
        let url = self.url(&[table.as_str(), "schema"])?;
        self.send::<()>("DELETE", &url, None)
            .map_err(|err| err.with_table(table.as_str()))?;
        Ok(())
    }

    fn list_tables(&self) -> ApiResult<Vec<TableName>> {
        let url = self.url(&[])?;
        let list: TableList = self.request_json::<(), _>("GET", &url, None)?;
        list.table
            .into_iter()
            .map(|entry| TableName::parse(&entry.name))
            .collect()
    }

    fn describe_table(&self, table: &TableName) -> ApiResult<TableDescriptor> {
        let url = self.url(&[table.as_str(), "schema"])?;
        let schema: TableSchema = self
            .request_json::<(), _>("GET", &url, None)
            .map_err(|err| err.with_table(table.as_str()))?;
        schema.into_descriptor()
    }

    fn put(&self, table: &TableName, puts: &[Put]) -> ApiResult<()> {
        if puts.is_empty() {
            return Ok(());
        }
        for put in puts {
            let durability = put.durability.effective();
            if durability != Durability::Sync {
                tracing::debug!(
                    table = %table,
                    row = %put.key.as_bstr(),
                    durability = durability.as_str(),
                    "gateway applies its own durability; requested level ignored"
                );
            }
        }
        let url = self.url(&[table.as_str(), MULTI_PUT_SEGMENT])?;
        let body = CellSet::from_puts(puts);
        self.send("PUT", &url, Some(&body))
            .map_err(|err| err.with_table(table.as_str()))?;
        Ok(())
    }

    fn delete(&self, table: &TableName, keys: &[Vec<u8>]) -> ApiResult<()> {
        for (done, key) in keys.iter().enumerate() {
            let row = row_segment(table, key)?;
            let url = self.url(&[table.as_str(), row])?;
            self.send::<()>("DELETE", &url, None).map_err(|err| {
                let err = err.with_table(table.as_str()).with_row(key.clone());
                if done > 0 {
                    err.with_hint(format!("{done} of {} rows were deleted before the failure", keys.len()))
                } else {
                    err
                }
            })?;
        }
        Ok(())
    }

    fn get(
        &self,
        table: &TableName,
        key: &[u8],
        columns: &ColumnSelector,
    ) -> ApiResult<Option<Row>> {
        let row = row_segment(table, key)?;
        let column = columns
            .to_column_bytes()
            .map(|column| {
                String::from_utf8(column).map_err(|_| {
                    Error::new(ErrorKind::Argument)
                        .with_message("gateway column addresses must be valid utf-8")
                        .with_table(table.as_str())
                })
            })
            .transpose()?;
        let url = match column.as_deref() {
            Some(column) => self.url(&[table.as_str(), row, column])?,
            None => self.url(&[table.as_str(), row])?,
        };
        let set: CellSet = match self.request_json::<(), _>("GET", &url, None) {
            Ok(set) => set,
            // A bare 404 means the row is absent; a missing table carries a table context.
            Err(err) if err.kind() == ErrorKind::NotFound && err.table().is_none() => {
                return Ok(None);
            }
            Err(err) => return Err(err.with_table(table.as_str())),
        };
        let mut rows = set.into_rows()?;
        let merged = rows.drain(..).fold(None::<Row>, |acc, row| match acc {
            Some(mut acc) => {
                acc.cells.extend(row.cells);
                Some(acc)
            }
            None => Some(row),
        });
        Ok(merged
            .map(|mut row| {
                row.sort_cells();
                row
            })
            .filter(|row| !row.is_empty()))
    }

    fn scan(&self, table: &TableName, spec: &ScanSpec) -> ApiResult<RestScanner> {
        let request = ScannerRequest {
            batch: Some(self.inner.scanner_batch),
            start_row: spec.start.as_deref().map(super::wire::encode),
            end_row: spec.stop.as_deref().map(super::wire::encode),
            column: spec
                .columns
                .to_column_bytes()
                .map(|column| vec![super::wire::encode(&column)])
                .unwrap_or_default(),
            filter: spec.filter.as_ref().map(|filter| filter.to_json()).transpose()?,
        };
        let url = self.url(&[table.as_str(), "scanner"])?;
        let response = self
            .send("POST", &url, Some(&request))
            .map_err(|err| err.with_table(table.as_str()))?;
        let location = response.header("Location").map(str::to_string).ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("gateway did not return a scanner location")
                .with_table(table.as_str())
        })?;
        self.track(&location);
        tracing::debug!(table = %table, location = %location, "opened scanner");
        Ok(RestScanner {
            store: self.clone(),
            table: table.clone(),
            location: Some(location),
            ready: VecDeque::new(),
            carry: None,
            exhausted: false,
        })
    }

    /// Releases scanners still open and reports every release failure.
    fn close(self) -> ApiResult<()> {
        let locations: Vec<String> = self
            .inner
            .open_scanners
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut failures = Vec::new();
        for location in &locations {
            if let Err(err) = self.release_scanner(location) {
                tracing::warn!(location = %location, error = %err, "failed to release scanner");
                failures.push(err);
            }
        }
        let Some(first) = failures.first() else {
            tracing::debug!(base_url = %self.inner.base_url, "closed gateway handle");
            return Ok(());
        };
        let kind = first.kind();
        let details: Vec<String> = failures.iter().map(|err| err.to_string()).collect();
        let source = failures.into_iter().next();
        let mut err = Error::new(kind)
            .with_message(format!(
                "failed to release {} of {} scanners",
                details.len(),
                locations.len()
            ))
            .with_hint(details.join("; "));
        if let Some(source) = source {
            err = err.with_source(source);
        }
        Err(err)
    }
}

/// Lazily pages rows out of a gateway scanner.
#[derive(Debug)]
pub struct RestScanner {
    store: RestStore,
    table: TableName,
    location: Option<String>,
    ready: VecDeque<Row>,
    carry: Option<Row>,
    exhausted: bool,
}

impl RestScanner {
    /// Fetches the next batch. `None` once the gateway reports no more rows.
    fn fetch(&mut self) -> ApiResult<Option<Vec<Row>>> {
        let Some(location) = self.location.as_deref() else {
            return Ok(None);
        };
        let url = Url::parse(location).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("invalid scanner location")
                .with_source(err)
        })?;
        let response = self
            .store
            .send::<()>("GET", &url, None)
            .map_err(|err| err.with_table(self.table.as_str()))?;
        if response.status() == 204 {
            return Ok(None);
        }
        let set: CellSet = read_json_response(response)?;
        Ok(Some(set.into_rows()?))
    }

    fn absorb(&mut self, rows: Vec<Row>) {
        for row in rows {
            match self.carry.take() {
                Some(mut carry) if carry.key == row.key => {
                    carry.cells.extend(row.cells);
                    self.carry = Some(carry);
                }
                Some(carry) => {
                    self.ready.push_back(carry);
                    self.carry = Some(row);
                }
                None => self.carry = Some(row),
            }
        }
    }

    fn release(&mut self) -> ApiResult<()> {
        match self.location.take() {
            Some(location) => self.store.release_scanner(&location),
            None => Ok(()),
        }
    }
}

impl Iterator for RestScanner {
    type Item = ApiResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.ready.pop_front() {
                return Some(Ok(row));
            }
            if self.exhausted {
                return self.carry.take().map(|mut row| {
                    row.sort_cells();
                    Ok(row)
                });
            }
            match self.fetch() {
                Ok(Some(rows)) => self.absorb(rows),
                Ok(None) => {
                    self.exhausted = true;
                    if let Err(err) = self.release() {
                        tracing::warn!(table = %self.table, error = %err, "failed to release scanner");
                    }
                }
                Err(err) => {
                    self.exhausted = true;
                    self.carry = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl RowScanner for RestScanner {
    fn close(&mut self) -> ApiResult<()> {
        self.exhausted = true;
        self.ready.clear();
        self.carry = None;
        self.release()
    }
}

impl Drop for RestScanner {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(table = %self.table, error = %err, "failed to release scanner on drop");
        }
    }
}

/// The row key as a single path segment, if the gateway can address it as a row.
fn row_segment<'a>(table: &TableName, key: &'a [u8]) -> ApiResult<&'a str> {
    let row = std::str::from_utf8(key).map_err(|err| {
        Error::new(ErrorKind::Argument)
            .with_message("gateway row addresses need utf-8 row keys")
            .with_hint("Use a scan with start and stop keys to reach binary rows.")
            .with_table(table.as_str())
            .with_row(key.to_vec())
            .with_source(err)
    })?;
    if RESERVED_ROW_SEGMENTS.contains(&row) {
        return Err(Error::new(ErrorKind::Argument)
            .with_message(format!("row key '{row}' collides with a gateway path"))
            .with_hint("Use a scan with start and stop keys to reach this row.")
            .with_table(table.as_str())
            .with_row(key.to_vec()));
    }
    Ok(row)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Argument).with_message("store url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return envelope.into_error();
    }
    let message = match body.trim() {
        "" => format!("gateway error status {status}"),
        text => format!("gateway error status {status}: {text}"),
    };
    Error::new(error_kind_from_status(status)).with_message(message)
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Argument,
        401 | 403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::AlreadyExists,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Connection,
    }
}
