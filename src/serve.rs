//! Purpose: Development REST gateway exposing an in-memory store over the gateway protocol.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum server used to exercise the REST client without a real cluster.
//! Invariants: Error bodies carry `{"error": {...}}` with stable kind names.
//! Invariants: A missing row answers a bare 404; a missing table answers 404 with an error body.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Scanners are dropped once exhausted or after sitting idle for `SCANNER_IDLE_TIMEOUT`.

use std::collections::{HashMap, VecDeque};
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;

use widecol::api::wire::{self, CellSet, ErrorEnvelope, ScannerRequest, TableList, TableListEntry, TableSchema, VersionInfo};
use widecol::api::{
    Cell, ColumnSelector, Columns, Connector, Error, ErrorKind, Filter, MemoryBackend,
    MemoryConnector, MemoryStore, Put, Row, RowScanner, ScanSpec, Store, TableName,
};
use widecol::core::memory::MemoryScanner;
use widecol::core::model::split_column;

const DEFAULT_SCANNER_BATCH: usize = 100;
const SCANNER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub token: Option<String>,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

struct AppState {
    store: MemoryStore,
    token: Option<String>,
    scanners: Mutex<HashMap<u64, OpenScanner>>,
    next_scanner_id: AtomicU64,
}

struct OpenScanner {
    scanner: MemoryScanner,
    batch: usize,
    pending: VecDeque<Cell>,
    last_used: Instant,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    serve_backend(config, MemoryBackend::new()).await
}

pub async fn serve_backend(config: ServeConfig, backend: Arc<MemoryBackend>) -> Result<(), Error> {
    validate_config(&config)?;

    let max_body_bytes: usize = config.max_body_bytes.try_into().map_err(|_| {
        Error::new(ErrorKind::Argument).with_message("--max-body-bytes is too large")
    })?;

    let state = Arc::new(AppState {
        store: MemoryConnector::with_backend(backend).connect()?,
        token: config.token,
        scanners: Mutex::new(HashMap::new()),
        next_scanner_id: AtomicU64::new(1),
    });

    let app = Router::new()
        .route("/", get(list_tables))
        .route("/healthz", get(healthz))
        .route("/version", get(version))
        .route("/:table/:segment", any(table_route))
        .route("/:table/:segment/:rest", any(nested_route))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "gateway listening");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    tracing::info!("gateway stopped");
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Argument)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }
    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Argument)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 8388608."));
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), Error> {
    let Some(token) = state.token.as_ref() else {
        return Ok(());
    };
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(Error::new(ErrorKind::Permission).with_message("missing bearer token"));
    };
    let value = value.to_str().unwrap_or_default();
    let expected = format!("Bearer {token}");
    if value != expected {
        return Err(Error::new(ErrorKind::Permission).with_message("invalid bearer token"));
    }
    Ok(())
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn version() -> Response {
    Json(VersionInfo {
        server: format!("widecol {}", env!("CARGO_PKG_VERSION")),
        rest: "0.0.3".to_string(),
    })
    .into_response()
}

async fn list_tables(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match state.store.list_tables() {
        Ok(names) => Json(TableList {
            table: names
                .into_iter()
                .map(|name| TableListEntry {
                    name: name.as_str().to_string(),
                })
                .collect(),
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn table_route(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    AxumPath((table, segment)): AxumPath<(String, String)>,
    body: Bytes,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    let table = match TableName::parse(&table) {
        Ok(table) => table,
        Err(err) => return error_response(err),
    };
    let result = match (segment.as_str(), &method) {
        ("schema", &Method::GET) => get_schema(&state, &table),
        ("schema", &Method::PUT) | ("schema", &Method::POST) => create_table(&state, &table, &body),
        ("schema", &Method::DELETE) => delete_table(&state, &table),
        ("exists", &Method::GET) => table_exists(&state, &table),
        ("scanner", &Method::POST) | ("scanner", &Method::PUT) => {
            open_scanner(&state, &headers, &table, &body)
        }
        (_, &Method::PUT) | (_, &Method::POST) => put_rows(&state, &table, &body),
        (row, &Method::GET) => get_row(&state, &table, row, None),
        (row, &Method::DELETE) => delete_row(&state, &table, row),
        _ => Err(method_not_allowed(&method)),
    };
    result.unwrap_or_else(error_response)
}

async fn nested_route(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    AxumPath((table, segment, rest)): AxumPath<(String, String, String)>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    let table = match TableName::parse(&table) {
        Ok(table) => table,
        Err(err) => return error_response(err),
    };
    let result = match (segment.as_str(), &method) {
        ("scanner", &Method::GET) => next_batch(&state, &rest),
        ("scanner", &Method::DELETE) => close_scanner(&state, &rest),
        (row, &Method::GET) => get_row(&state, &table, row, Some(&rest)),
        _ => Err(method_not_allowed(&method)),
    };
    result.unwrap_or_else(error_response)
}

fn get_schema(state: &AppState, table: &TableName) -> Result<Response, Error> {
    let descriptor = state.store.describe_table(table)?;
    Ok(Json(TableSchema::from_descriptor(&descriptor)).into_response())
}

fn create_table(state: &AppState, table: &TableName, body: &[u8]) -> Result<Response, Error> {
    let mut schema: TableSchema = parse_body(body)?;
    schema.name = table.as_str().to_string();
    let descriptor = schema.into_descriptor()?;
    state.store.create_table(&descriptor)?;
    tracing::info!(table = %table, "created table");
    Ok(StatusCode::CREATED.into_response())
}

fn delete_table(state: &AppState, table: &TableName) -> Result<Response, Error> {
    state.store.disable_table(table)?;
    state.store.delete_table(table)?;
    tracing::info!(table = %table, "deleted table");
    Ok(StatusCode::OK.into_response())
}

fn table_exists(state: &AppState, table: &TableName) -> Result<Response, Error> {
    if state.store.table_exists(table)? {
        Ok(StatusCode::OK.into_response())
    } else {
        Err(Error::new(ErrorKind::NotFound)
            .with_message("table not found")
            .with_table(table.as_str()))
    }
}

fn put_rows(state: &AppState, table: &TableName, body: &[u8]) -> Result<Response, Error> {
    let set: CellSet = parse_body(body)?;
    let puts = puts_from_cell_set(set)?;
    state.store.put(table, &puts)?;
    Ok(StatusCode::OK.into_response())
}

fn get_row(
    state: &AppState,
    table: &TableName,
    row: &str,
    column: Option<&str>,
) -> Result<Response, Error> {
    let selector = match column {
        Some(column) => {
            let (family, qualifier) = split_column(column.as_bytes())?;
            ColumnSelector::from_parts(Some(family.as_str()), Some(qualifier.as_slice()))
        }
        None => ColumnSelector::All,
    };
    match state.store.get(table, row.as_bytes(), &selector)? {
        Some(row) => Ok(Json(CellSet::from_rows([&row])).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

fn delete_row(state: &AppState, table: &TableName, row: &str) -> Result<Response, Error> {
    state.store.delete(table, &[row.as_bytes().to_vec()])?;
    Ok(StatusCode::OK.into_response())
}

fn open_scanner(
    state: &AppState,
    headers: &HeaderMap,
    table: &TableName,
    body: &[u8],
) -> Result<Response, Error> {
    let request: ScannerRequest = if body.is_empty() {
        ScannerRequest::default()
    } else {
        parse_body(body)?
    };
    let batch = request.batch.map_or(DEFAULT_SCANNER_BATCH, |batch| batch.max(1) as usize);
    let spec = scan_spec_from_request(request)?;
    let scanner = state.store.scan(table, &spec)?;

    let id = state.next_scanner_id.fetch_add(1, Ordering::SeqCst);
    let mut scanners = lock_scanners(state)?;
    evict_idle_scanners(&mut scanners, Instant::now());
    scanners.insert(
        id,
        OpenScanner {
            scanner,
            batch,
            pending: VecDeque::new(),
            last_used: Instant::now(),
        },
    );
    drop(scanners);
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("127.0.0.1");
    let location = format!("http://{host}/{}/scanner/{id}", table.as_str());
    tracing::debug!(table = %table, scanner = id, "opened scanner");

    let mut response = StatusCode::CREATED.into_response();
    let value = HeaderValue::from_str(&location).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid scanner location")
            .with_source(err)
    })?;
    response.headers_mut().insert(header::LOCATION, value);
    Ok(response)
}

fn next_batch(state: &AppState, id: &str) -> Result<Response, Error> {
    let id = parse_scanner_id(id)?;
    let mut scanners = lock_scanners(state)?;
    let Some(open) = scanners.get_mut(&id) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    open.last_used = Instant::now();
    let rows = open.take_batch()?;
    if rows.is_empty() {
        if let Some(mut done) = scanners.remove(&id) {
            done.scanner.close()?;
        }
        tracing::debug!(scanner = id, "scanner exhausted");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(CellSet::from_rows(&rows)).into_response())
}

/// Drops scanners whose client has not fetched from them within the idle timeout.
fn evict_idle_scanners(scanners: &mut HashMap<u64, OpenScanner>, now: Instant) {
    scanners.retain(|id, open| {
        let idle = now.saturating_duration_since(open.last_used);
        if idle < SCANNER_IDLE_TIMEOUT {
            return true;
        }
        if let Err(err) = open.scanner.close() {
            tracing::warn!(scanner = *id, error = %err, "failed to close idle scanner");
        }
        tracing::debug!(scanner = *id, idle_secs = idle.as_secs(), "evicted idle scanner");
        false
    });
}

fn close_scanner(state: &AppState, id: &str) -> Result<Response, Error> {
    let id = parse_scanner_id(id)?;
    match lock_scanners(state)?.remove(&id) {
        Some(mut open) => {
            open.scanner.close()?;
            tracing::debug!(scanner = id, "closed scanner");
            Ok(StatusCode::OK.into_response())
        }
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

impl OpenScanner {
    /// Up to `batch` cells; a row larger than the batch spans several calls.
    fn take_batch(&mut self) -> Result<Vec<Row>, Error> {
        let mut rows: Vec<Row> = Vec::new();
        let mut taken = 0;
        while taken < self.batch {
            if self.pending.is_empty() {
                match self.scanner.next() {
                    Some(row) => {
                        let row = row?;
                        if row.cells.is_empty() {
                            // Key-only rows still need one entry to be visible.
                            rows.push(row);
                            taken += 1;
                            continue;
                        }
                        self.pending.extend(row.cells);
                    }
                    None => break,
                }
            }
            let Some(cell) = self.pending.pop_front() else {
                continue;
            };
            match rows.last_mut() {
                Some(last) if last.key == cell.row => last.cells.push(cell),
                _ => rows.push(Row {
                    key: cell.row.clone(),
                    cells: vec![cell],
                }),
            }
            taken += 1;
        }
        Ok(rows)
    }
}

fn scan_spec_from_request(request: ScannerRequest) -> Result<ScanSpec, Error> {
    let mut spec = ScanSpec::new();
    if let Some(start) = request.start_row.as_deref() {
        spec = spec.with_start(wire::decode(start, "startRow")?);
    }
    if let Some(end) = request.end_row.as_deref() {
        spec = spec.with_stop(wire::decode(end, "endRow")?);
    }
    match request.column.as_slice() {
        [] => {}
        [column] => {
            let (family, qualifier) = split_column(&wire::decode(column, "column")?)?;
            spec = spec.with_columns(ColumnSelector::from_parts(Some(family.as_str()), Some(qualifier.as_slice())));
        }
        _ => {
            return Err(Error::new(ErrorKind::Argument)
                .with_message("scanner accepts at most one column restriction"));
        }
    }
    if let Some(filter) = request.filter.as_deref() {
        spec = spec.with_filter(Filter::from_json(filter)?);
    }
    Ok(spec)
}

fn puts_from_cell_set(set: CellSet) -> Result<Vec<Put>, Error> {
    set.rows
        .into_iter()
        .map(|entry| {
            let key = wire::decode(&entry.key, "key")?;
            let mut columns = Columns::new();
            for cell in entry.cells {
                let (family, qualifier) = split_column(&wire::decode(&cell.column, "column")?)?;
                columns.insert(family, qualifier, wire::decode(&cell.value, "$")?);
            }
            Ok(Put::new(key, columns))
        })
        .collect()
}

fn parse_scanner_id(raw: &str) -> Result<u64, Error> {
    raw.parse::<u64>().map_err(|_| {
        Error::new(ErrorKind::Argument).with_message(format!("invalid scanner id '{raw}'"))
    })
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|err| {
        Error::new(ErrorKind::Argument)
            .with_message("invalid request json")
            .with_source(err)
    })
}

fn lock_scanners(state: &AppState) -> Result<std::sync::MutexGuard<'_, HashMap<u64, OpenScanner>>, Error> {
    state
        .scanners
        .lock()
        .map_err(|_| Error::new(ErrorKind::Internal).with_message("scanner table lock poisoned"))
}

fn method_not_allowed(method: &Method) -> Error {
    Error::new(ErrorKind::Argument).with_message(format!("method {method} not supported here"))
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Argument | ErrorKind::Schema => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Permission => StatusCode::UNAUTHORIZED,
        ErrorKind::Connection => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!(error = %err, "request failed");
    }
    (status, Json(ErrorEnvelope::from_error(&err))).into_response()
}
