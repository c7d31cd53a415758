//! Purpose: End-to-end tests for the gateway server and the REST store client.
//! Exports: None (integration test module).
//! Role: Run the facade checks across TCP and validate scanner paging and auth.
//! Invariants: Uses a loopback-only `widecol serve` child process per test.
//! Invariants: Bounded waits avoid test flakiness; servers are killed on drop.

mod common;

use common::{TestResult, TestServer, collect, keys, pick_port};
use std::time::Duration;
use widecol::api::{
    Columns, Connector, ErrorKind, Put, RestConfig, RestConnector, RowScanner, Store, TableFacade,
};

#[test]
fn remote_create_is_idempotent() -> TestResult<()> {
    let server = TestServer::start()?;
    common::check_create_is_idempotent(&mut server.facade()?)
}

#[test]
fn remote_put_then_get() -> TestResult<()> {
    let server = TestServer::start()?;
    common::check_put_then_get(&mut server.facade()?)
}

#[test]
fn remote_delete_rows() -> TestResult<()> {
    let server = TestServer::start()?;
    common::check_delete_row(&mut server.facade()?)
}

#[test]
fn remote_scan_ranges() -> TestResult<()> {
    let server = TestServer::start()?;
    common::check_scan_ranges(&mut server.facade()?)
}

#[test]
fn remote_put_many_and_filters() -> TestResult<()> {
    let server = TestServer::start()?;
    let mut facade = server.facade()?;
    common::check_put_many(&mut facade)?;
    common::check_scan_with_filter(&mut facade)?;
    common::check_table_listing(&mut facade)?;
    common::check_delete_missing_table(&mut facade)?;
    facade.close()?;
    Ok(())
}

#[test]
fn remote_t1_scenario() -> TestResult<()> {
    let server = TestServer::start()?;
    common::check_t1_scenario(&mut server.facade()?)
}

#[test]
fn remote_scanner_merges_rows_split_across_batches() -> TestResult<()> {
    let server = TestServer::start()?;
    let config = server.config()?.with_scanner_batch(2)?;
    let mut facade = TableFacade::new(RestConnector::new(config));
    facade.create_table("wide", &["cf"])?;

    let puts: Vec<Put> = ["a", "b", "c"]
        .iter()
        .map(|key| {
            let mut columns = Columns::new();
            for idx in 0..5 {
                columns.insert("cf", format!("q{idx}"), format!("{key}{idx}"));
            }
            Put::new(*key, columns)
        })
        .collect();
    facade.put_many("wide", puts)?;

    let rows = collect(facade.scan_all("wide")?)?;
    assert_eq!(keys(&rows), vec!["a", "b", "c"]);
    for row in &rows {
        assert_eq!(row.cells.len(), 5);
    }
    facade.close()?;
    Ok(())
}

#[test]
fn remote_close_releases_open_scanners() -> TestResult<()> {
    let server = TestServer::start()?;
    let config = server.config()?.with_scanner_batch(1)?;
    let mut facade = TableFacade::new(RestConnector::new(config));
    let store = facade.connect()?.clone();
    facade.create_table("scanners", &["cf"])?;
    facade.put_many(
        "scanners",
        vec![
            Put::new("r1", Columns::new().with("cf", "q", "1")),
            Put::new("r2", Columns::new().with("cf", "q", "2")),
        ],
    )?;

    let mut finished = facade.scan_all("scanners")?;
    let drained = finished.by_ref().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(drained.len(), 2);
    finished.close()?;
    assert_eq!(store.open_scanner_count(), 0);

    let mut pending = facade.scan_all("scanners")?;
    assert!(pending.next().is_some());
    assert_eq!(store.open_scanner_count(), 1);

    store.clone().close()?;
    assert_eq!(store.open_scanner_count(), 0);
    drop(pending);
    facade.close()?;
    Ok(())
}

#[test]
fn remote_close_reports_scanners_it_could_not_release() -> TestResult<()> {
    let mut server = TestServer::start()?;
    let config = server.config()?.with_scanner_batch(1)?;
    let mut facade = TableFacade::new(RestConnector::new(config));
    let store = facade.connect()?.clone();
    facade.create_table("stranded", &["cf"])?;
    facade.put_many(
        "stranded",
        vec![
            Put::new("r1", Columns::new().with("cf", "q", "1")),
            Put::new("r2", Columns::new().with("cf", "q", "2")),
        ],
    )?;
    let mut pending = facade.scan_all("stranded")?;
    assert!(pending.next().is_some());
    assert_eq!(store.open_scanner_count(), 1);

    server.stop();
    let err = store.clone().close().expect_err("gateway is gone");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("failed to release 1 of 1 scanners"), "{err}");
    assert_eq!(store.open_scanner_count(), 1);

    let err = facade.close().expect_err("facade close reports the same failure");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(!facade.is_connected());
    drop(pending);
    Ok(())
}

#[test]
fn remote_row_keys_that_name_gateway_paths_are_rejected() -> TestResult<()> {
    let server = TestServer::start()?;
    let mut facade = server.facade()?;
    facade.create_table("reserved", &["cf"])?;
    let reserved = ["schema", "exists", "scanner", "..", "."];
    let puts = reserved
        .iter()
        .map(|key| Put::new(*key, Columns::new().with("cf", "a", format!("v-{key}"))))
        .collect();
    facade.put_many("reserved", puts)?;

    for key in reserved {
        let err = facade
            .get_row("reserved", key.as_bytes(), None, None)
            .expect_err("row address would hit another endpoint");
        assert_eq!(err.kind(), ErrorKind::Argument, "{key}");
        let err = facade
            .delete_row("reserved", key.as_bytes())
            .expect_err("row address would hit another endpoint");
        assert_eq!(err.kind(), ErrorKind::Argument, "{key}");
    }
    assert!(facade.table_exists("reserved")?);

    let mut stop = b"schema".to_vec();
    stop.push(0);
    let rows = collect(facade.scan_range("reserved", None, None, Some(b"schema".as_slice()), Some(stop.as_slice()))?)?;
    assert_eq!(keys(&rows), vec!["schema"]);
    assert_eq!(rows[0].value("cf", b"a"), Some(b"v-schema".as_slice()));

    let rows = collect(facade.scan_all("reserved")?)?;
    assert_eq!(keys(&rows), vec![".", "..", "exists", "scanner", "schema"]);
    Ok(())
}

#[test]
fn remote_errors_propagate_kind() -> TestResult<()> {
    let server = TestServer::start()?;
    let mut facade = server.facade()?;

    let err = facade.describe_table("missing").expect_err("missing table");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.table(), Some("missing"));

    facade.create_table("typed", &["cf"])?;
    let err = facade
        .put_one("typed", "r1", Columns::new().with("nope", "q", "1"), Default::default())
        .expect_err("unknown family");
    assert_eq!(err.kind(), ErrorKind::Schema);

    let err = facade
        .get_row("missing", b"r1", None, None)
        .expect_err("missing table on get");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn remote_auth_requires_valid_token() -> TestResult<()> {
    let server = TestServer::start_with_token(Some("secret-token"))?;

    let unauthenticated = RestConnector::new(server.config()?);
    let mut facade = TableFacade::new(unauthenticated);
    let err = facade.list_table_names().expect_err("missing token");
    assert_eq!(err.kind(), ErrorKind::Permission);

    let wrong = RestConnector::new(server.config()?.with_token("wrong"));
    let err = TableFacade::new(wrong)
        .table_exists("t1")
        .expect_err("wrong token");
    assert_eq!(err.kind(), ErrorKind::Permission);

    let authed = RestConnector::new(server.config()?.with_token("secret-token"));
    let mut facade = TableFacade::new(authed);
    facade.create_table("t1", &["cf"])?;
    assert!(facade.table_exists("t1")?);
    Ok(())
}

#[test]
fn remote_connect_to_stopped_server_is_connection_error() -> TestResult<()> {
    let port = pick_port()?;
    let config = RestConfig::new(&format!("http://127.0.0.1:{port}"))?
        .with_timeout(Duration::from_secs(2));
    let err = RestConnector::new(config)
        .connect()
        .expect_err("nothing listening");
    assert_eq!(err.kind(), ErrorKind::Connection);
    Ok(())
}

#[test]
fn remote_binary_values_round_trip() -> TestResult<()> {
    let server = TestServer::start()?;
    let mut facade = server.facade()?;
    facade.create_table("bytes", &["cf"])?;
    let value = vec![0u8, 255, 10, 13, b'"'];
    facade.put_one(
        "bytes",
        "r1",
        Columns::new().with("cf", vec![1u8, 2, 3], value.clone()),
        Default::default(),
    )?;
    let cells = facade.get_row("bytes", b"r1", None, None)?;
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].qualifier, vec![1u8, 2, 3]);
    assert_eq!(cells[0].value, value);
    Ok(())
}
