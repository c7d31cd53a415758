//! Purpose: Shared fixtures for integration tests.
//! Exports: `TestServer` (a `widecol serve` child process), one `check_*` function per facade property.
//! Role: Run the same assertions against every `Connector` implementation.
//! Invariants: Each check uses its own table names so checks can share a store.
#![allow(dead_code)]

use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};
use widecol::api::{
    ApiResult, Columns, Connector, CreateOutcome, DeleteOutcome, Durability, Filter, Put,
    RestConfig, RestConnector, Row, RowScanner, TableFacade,
};

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

pub struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    pub fn start() -> TestResult<Self> {
        Self::start_with_token(None)
    }

    pub fn start_with_token(token: Option<&str>) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut command = Command::new(env!("CARGO_BIN_EXE_widecol"));
            command
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .env_remove("WIDECOL_TOKEN")
                .stdout(Stdio::null())
                .stderr(Stdio::piped());
            if let Some(token) = token {
                command.arg("--token").arg(token);
            }
            let mut child = command.spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    pub fn config(&self) -> TestResult<RestConfig> {
        Ok(RestConfig::new(&self.base_url)?.with_timeout(Duration::from_secs(5)))
    }

    /// Kills the gateway while clients may still hold scanners on it.
    pub fn stop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn facade(&self) -> TestResult<TableFacade<RestConnector>> {
        Ok(TableFacade::new(RestConnector::new(self.config()?)))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let url = format!("http://{addr}/healthz");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}

pub fn collect<S: RowScanner>(scanner: S) -> ApiResult<Vec<Row>> {
    scanner.collect()
}

pub fn keys(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|row| String::from_utf8_lossy(&row.key).into_owned())
        .collect()
}

fn seed_rows<C: Connector>(facade: &mut TableFacade<C>, table: &str, keys: &[&str]) -> TestResult<()> {
    facade.create_table(table, &["cf"])?;
    let puts = keys
        .iter()
        .map(|key| Put::new(*key, Columns::new().with("cf", "q", format!("v-{key}"))))
        .collect();
    facade.put_many(table, puts)?;
    Ok(())
}

pub fn check_create_is_idempotent<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    assert!(!facade.table_exists("contract_create")?);
    assert_eq!(
        facade.create_table("contract_create", &["cf1", "cf2"])?,
        CreateOutcome::Created
    );
    assert!(facade.table_exists("contract_create")?);

    assert_eq!(
        facade.create_table("contract_create", &["other"])?,
        CreateOutcome::AlreadyExists
    );
    let descriptor = facade.describe_table("contract_create")?;
    let families: Vec<&str> = descriptor.families().iter().map(|f| f.name()).collect();
    assert_eq!(families, vec!["cf1", "cf2"]);
    Ok(())
}

pub fn check_put_then_get<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    facade.create_table("contract_put", &["cf1", "cf2"])?;
    let columns = Columns::new()
        .with("cf1", "a", "alpha")
        .with("cf1", "b", "beta")
        .with("cf2", "c", "gamma");
    facade.put_one("contract_put", "row-1", columns, Durability::Skip)?;

    let cells = facade.get_row("contract_put", b"row-1", None, None)?;
    let got: Vec<(String, Vec<u8>, Vec<u8>)> = cells
        .into_iter()
        .map(|cell| (cell.family, cell.qualifier, cell.value))
        .collect();
    assert_eq!(
        got,
        vec![
            ("cf1".to_string(), b"a".to_vec(), b"alpha".to_vec()),
            ("cf1".to_string(), b"b".to_vec(), b"beta".to_vec()),
            ("cf2".to_string(), b"c".to_vec(), b"gamma".to_vec()),
        ]
    );

    let family_only = facade.get_row("contract_put", b"row-1", Some("cf2"), None)?;
    assert_eq!(family_only.len(), 1);
    assert_eq!(family_only[0].value, b"gamma");

    let one = facade.get_row("contract_put", b"row-1", Some("cf1"), Some(b"b".as_slice()))?;
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].value, b"beta");

    assert!(facade.get_row("contract_put", b"absent", None, None)?.is_empty());
    Ok(())
}

pub fn check_delete_row<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    seed_rows(facade, "contract_delete", &["r1", "r2", "r3"])?;
    facade.delete_row("contract_delete", b"r2")?;
    assert!(facade.get_row("contract_delete", b"r2", None, None)?.is_empty());
    assert_eq!(facade.get_row("contract_delete", b"r1", None, None)?.len(), 1);

    facade.delete_rows("contract_delete", &[b"r1".to_vec(), b"r3".to_vec()])?;
    let rows = collect(facade.scan_all("contract_delete")?)?;
    assert!(rows.is_empty());
    Ok(())
}

pub fn check_scan_ranges<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    seed_rows(facade, "contract_scan", &["k4", "k1", "k3", "k0", "k2"])?;

    let rows = collect(facade.scan_range("contract_scan", None, None, Some(b"k1".as_slice()), Some(b"k3".as_slice()))?)?;
    assert_eq!(keys(&rows), vec!["k1", "k2"]);

    let rows = collect(facade.scan_range("contract_scan", None, None, Some(b"k3".as_slice()), None)?)?;
    assert_eq!(keys(&rows), vec!["k3", "k4"]);

    let rows = collect(facade.scan_range("contract_scan", None, None, None, Some(b"k2".as_slice()))?)?;
    assert_eq!(keys(&rows), vec!["k0", "k1"]);

    let rows = collect(facade.scan_range("contract_scan", None, None, Some(b"k3".as_slice()), Some(b"k1".as_slice()))?)?;
    assert!(rows.is_empty());

    let rows = collect(facade.scan_all("contract_scan")?)?;
    assert_eq!(keys(&rows), vec!["k0", "k1", "k2", "k3", "k4"]);

    facade.create_table("contract_scan_cols", &["cf1", "cf2"])?;
    facade.put_many(
        "contract_scan_cols",
        vec![
            Put::new(
                "r1",
                Columns::new()
                    .with("cf1", "a", "r1-a")
                    .with("cf1", "b", "r1-b")
                    .with("cf2", "c", "r1-c"),
            ),
            Put::new("r2", Columns::new().with("cf2", "c", "r2-c")),
            Put::new("r3", Columns::new().with("cf1", "b", "r3-b")),
            Put::new("r4", Columns::new().with("cf1", "a", "r4-a")),
        ],
    )?;

    let rows = collect(facade.scan_range("contract_scan_cols", Some("cf1"), None, Some(b"r1".as_slice()), Some(b"r4".as_slice()))?)?;
    assert_eq!(keys(&rows), vec!["r1", "r3"]);
    let columns: Vec<(&str, &[u8])> = rows[0]
        .cells
        .iter()
        .map(|cell| (cell.family.as_str(), cell.qualifier.as_slice()))
        .collect();
    assert_eq!(columns, vec![("cf1", b"a".as_slice()), ("cf1", b"b".as_slice())]);

    let rows = collect(facade.scan_range("contract_scan_cols", Some("cf1"), Some(b"b".as_slice()), None, None)?)?;
    assert_eq!(keys(&rows), vec!["r1", "r3"]);
    for row in &rows {
        assert_eq!(row.cells.len(), 1);
        assert_eq!(row.cells[0].family, "cf1");
        assert_eq!(row.cells[0].qualifier, b"b");
    }
    assert_eq!(rows[0].value("cf1", b"b"), Some(b"r1-b".as_slice()));

    let rows = collect(facade.scan_range("contract_scan_cols", Some("cf2"), Some(b"c".as_slice()), Some(b"r2".as_slice()), None)?)?;
    assert_eq!(keys(&rows), vec!["r2"]);
    assert_eq!(rows[0].value("cf2", b"c"), Some(b"r2-c".as_slice()));
    Ok(())
}

pub fn check_put_many<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    facade.create_table("contract_many", &["cf"])?;
    let puts: Vec<Put> = (0..25)
        .rev()
        .map(|idx| {
            let key = format!("row-{idx:02}");
            let mut columns = Columns::new().with("cf", "id", idx.to_string());
            if idx % 2 == 0 {
                columns.insert("cf", "even", "yes");
            }
            Put::new(key, columns)
        })
        .collect();
    facade.put_many("contract_many", puts)?;

    let rows = collect(facade.scan_all("contract_many")?)?;
    assert_eq!(rows.len(), 25);
    for (idx, row) in rows.iter().enumerate() {
        assert_eq!(row.key, format!("row-{idx:02}").into_bytes());
        assert_eq!(row.value("cf", b"id"), Some(idx.to_string().as_bytes()));
        let expected_cells = if idx % 2 == 0 { 2 } else { 1 };
        assert_eq!(row.cells.len(), expected_cells);
    }
    Ok(())
}

pub fn check_scan_with_filter<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    seed_rows(facade, "contract_filter", &["user-1", "user-2", "order-1"])?;
    let rows = collect(facade.scan_with_filter("contract_filter", Filter::prefix("user-"))?)?;
    assert_eq!(keys(&rows), vec!["user-1", "user-2"]);

    let rows = collect(
        facade.scan_with_filter("contract_filter", Filter::value_eq("v-order-1"))?,
    )?;
    assert_eq!(keys(&rows), vec!["order-1"]);
    Ok(())
}

pub fn check_delete_missing_table<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    assert_eq!(facade.delete_table("contract_never_created")?, DeleteOutcome::Missing);
    Ok(())
}

pub fn check_table_listing<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    facade.create_table("contract_list_b", &["cf"])?;
    facade.create_table("contract_list_a", &["cf"])?;
    let names = facade.list_table_names()?;
    let listed: Vec<&String> = names
        .iter()
        .filter(|name| name.starts_with("contract_list_"))
        .collect();
    assert_eq!(listed, vec!["contract_list_a", "contract_list_b"]);
    Ok(())
}

pub fn check_t1_scenario<C: Connector>(facade: &mut TableFacade<C>) -> TestResult<()> {
    facade.create_table("t1", &["cf1", "cf2"])?;
    facade.put_one(
        "t1",
        "r1",
        Columns::new().with("cf1", "a", "1").with("cf2", "b", "2"),
        Durability::Sync,
    )?;
    let cells = facade.get_row("t1", b"r1", None, None)?;
    let values: Vec<&[u8]> = cells.iter().map(|cell| cell.value.as_slice()).collect();
    assert_eq!(values, vec![b"1".as_slice(), b"2".as_slice()]);

    assert_eq!(facade.delete_table("t1")?, DeleteOutcome::Deleted);
    assert!(!facade.table_exists("t1")?);
    Ok(())
}
