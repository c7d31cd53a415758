// CLI integration tests: output envelopes, notices, and exit codes.
mod common;

use std::io::Write;
use std::process::{Command, Output, Stdio};

use common::{TestServer, pick_port};
use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_widecol");
    let mut command = Command::new(exe);
    command.env_remove("WIDECOL_STORE").env_remove("WIDECOL_TOKEN");
    command
}

fn run(store: &str, args: &[&str]) -> Output {
    cmd()
        .arg("--store")
        .arg(store)
        .args(args)
        .output()
        .expect("run widecol")
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn stdout_json(output: &Output) -> Value {
    parse_json(std::str::from_utf8(&output.stdout).expect("utf8").trim())
}

fn stdout_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_json)
        .collect()
}

fn stderr_json(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .rev()
        .find(|line| line.starts_with('{'))
        .expect("json line on stderr");
    parse_json(line)
}

#[test]
fn table_row_and_scan_flow_against_gateway() {
    let server = TestServer::start().expect("server");
    let store = server.base_url();

    let create = run(store, &["table", "create", "t1", "cf1", "cf2"]);
    assert!(create.status.success(), "{}", String::from_utf8_lossy(&create.stderr));
    let created = stdout_json(&create);
    assert_eq!(created["table"], "t1");
    assert_eq!(created["created"], true);

    let again = run(store, &["table", "create", "t1", "cf1", "cf2"]);
    assert!(again.status.success());
    assert_eq!(stdout_json(&again)["created"], false);
    let notice = stderr_json(&again);
    assert_eq!(notice["notice"]["kind"], "table_exists");
    assert_eq!(notice["notice"]["table"], "t1");

    let put = run(store, &["put", "t1", "r1", "--col", "cf1:a=1", "--col", "cf2:b=2"]);
    assert!(put.status.success(), "{}", String::from_utf8_lossy(&put.stderr));
    assert_eq!(stdout_json(&put)["cells"], 2);

    let get = run(store, &["get", "t1", "r1"]);
    assert!(get.status.success());
    let row = stdout_json(&get);
    assert_eq!(row["row"], "r1");
    let values: Vec<&str> = row["cells"]
        .as_array()
        .expect("cells")
        .iter()
        .map(|cell| cell["value"].as_str().expect("value"))
        .collect();
    assert_eq!(values, vec!["1", "2"]);

    let one = run(store, &["get", "t1", "r1", "--family", "cf2", "--qualifier", "b"]);
    assert!(one.status.success());
    assert_eq!(stdout_json(&one)["cells"].as_array().map(Vec::len), Some(1));

    for key in ["r2", "r3", "r4"] {
        let put = run(store, &["put", "t1", key, "--col", &format!("cf1:a={key}")]);
        assert!(put.status.success());
    }
    let scan = run(store, &["scan", "t1", "--start", "r2", "--stop", "r4"]);
    assert!(scan.status.success());
    let rows: Vec<String> = stdout_lines(&scan)
        .iter()
        .map(|row| row["row"].as_str().expect("row").to_string())
        .collect();
    assert_eq!(rows, vec!["r2", "r3"]);

    let filtered = run(store, &["scan", "t1", "--filter", "ValueFilter(=, 'binary:r4')"]);
    assert!(filtered.status.success(), "{}", String::from_utf8_lossy(&filtered.stderr));
    let rows = stdout_lines(&filtered);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["row"], "r4");

    let limited = run(store, &["scan", "t1", "--limit", "2"]);
    assert_eq!(stdout_lines(&limited).len(), 2);

    let delete = run(store, &["delete", "t1", "r1", "r2"]);
    assert!(delete.status.success());
    assert_eq!(stdout_json(&delete)["deleted"], 2);
    let get = run(store, &["get", "t1", "r1"]);
    assert!(get.status.success());
    assert_eq!(stdout_json(&get)["cells"].as_array().map(Vec::len), Some(0));

    let list = run(store, &["table", "list"]);
    assert_eq!(stdout_json(&list)["tables"], serde_json::json!(["t1"]));

    let describe = run(store, &["table", "describe", "t1"]);
    let descriptor = stdout_json(&describe);
    assert_eq!(descriptor["families"][0]["name"], "cf1");
    assert_eq!(descriptor["families"][1]["name"], "cf2");

    let drop = run(store, &["table", "delete", "t1"]);
    assert!(drop.status.success());
    assert_eq!(stdout_json(&drop)["deleted"], true);
    let exists = run(store, &["table", "exists", "t1"]);
    assert!(exists.status.success());
    assert_eq!(stdout_json(&exists)["exists"], false);

    let missing = run(store, &["table", "delete", "t1"]);
    assert!(missing.status.success());
    assert_eq!(stdout_json(&missing)["deleted"], false);
    assert_eq!(stderr_json(&missing)["notice"]["kind"], "table_missing");
}

#[test]
fn put_many_reads_jsonl_from_file_and_stdin() {
    let server = TestServer::start().expect("server");
    let store = server.base_url();
    assert!(run(store, &["table", "create", "batch", "cf"]).status.success());

    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("rows.jsonl");
    std::fs::write(
        &path,
        concat!(
            "{\"row\":\"b\",\"columns\":{\"cf:q\":\"2\"}}\n",
            "{\"row\":\"a\",\"columns\":{\"cf:q\":\"1\",\"cf:r\":\"x\"}}\n",
        ),
    )
    .expect("write rows");
    let from_file = run(store, &["put-many", "batch", "--file", path.to_str().expect("path")]);
    assert!(from_file.status.success(), "{}", String::from_utf8_lossy(&from_file.stderr));
    assert_eq!(stdout_json(&from_file)["rows"], 2);

    let mut child = cmd()
        .args(["--store", store, "put-many", "batch"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn put-many");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"{\"row\":\"c\",\"columns\":{\"cf:q\":\"3\"}}\n")
        .expect("write stdin");
    let from_stdin = child.wait_with_output().expect("put-many output");
    assert!(from_stdin.status.success());
    assert_eq!(stdout_json(&from_stdin)["rows"], 1);

    let scan = run(store, &["scan", "batch"]);
    let rows: Vec<String> = stdout_lines(&scan)
        .iter()
        .map(|row| row["row"].as_str().expect("row").to_string())
        .collect();
    assert_eq!(rows, vec!["a", "b", "c"]);
}

#[test]
fn bad_batch_line_writes_nothing() {
    let server = TestServer::start().expect("server");
    let store = server.base_url();
    assert!(run(store, &["table", "create", "strict", "cf"]).status.success());

    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("rows.jsonl");
    std::fs::write(
        &path,
        "{\"row\":\"a\",\"columns\":{\"cf:q\":\"1\"}}\n{\"row\":\"b\",\"columns\":{\"noqualifier\":\"1\"}}\n",
    )
    .expect("write rows");
    let output = run(store, &["put-many", "strict", "--file", path.to_str().expect("path")]);
    assert_eq!(output.status.code(), Some(2));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Argument");
    assert!(err["error"]["message"].as_str().expect("message").starts_with("line 2:"));

    let scan = run(store, &["scan", "strict"]);
    assert!(stdout_lines(&scan).is_empty());
}

#[test]
fn not_found_exit_code() {
    let output = run("memory", &["get", "ghost", "r1"]);
    assert_eq!(output.status.code(), Some(3));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert_eq!(err["error"]["table"], "ghost");
}

#[test]
fn memory_store_starts_empty_each_run() {
    let create = run("memory", &["table", "create", "t1", "cf"]);
    assert!(create.status.success());
    assert_eq!(stdout_json(&create)["created"], true);

    let exists = run("memory", &["table", "exists", "t1"]);
    assert!(exists.status.success());
    assert_eq!(stdout_json(&exists)["exists"], false);

    let list = run("memory", &["table", "list"]);
    assert_eq!(stdout_json(&list)["tables"], serde_json::json!([]));
}

#[test]
fn usage_exit_code() {
    let output = run("memory", &["put", "t1"]);
    assert_eq!(output.status.code(), Some(2));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Argument");
    assert_eq!(err["error"]["hint"], "Try `widecol put --help`.");

    let bad_col = run("memory", &["put", "t1", "r1", "--col", "nocolon=1"]);
    assert_eq!(bad_col.status.code(), Some(2));

    let bad_filter = run("memory", &["scan", "t1", "--filter", "PrefixFilter("]);
    assert_eq!(bad_filter.status.code(), Some(2));

    let bad_durability = run("memory", &["put", "t1", "r1", "--col", "cf:a=1", "--durability", "maybe"]);
    assert_eq!(bad_durability.status.code(), Some(2));
}

#[test]
fn schema_errors_have_their_own_exit_code() {
    let output = run("memory", &["table", "create", "bad name", "cf"]);
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(stderr_json(&output)["error"]["kind"], "Schema");
}

#[test]
fn unreachable_gateway_is_connection_error() {
    let port = pick_port().expect("port");
    let output = run(
        &format!("http://127.0.0.1:{port}"),
        &["--timeout", "2s", "table", "list"],
    );
    assert_eq!(output.status.code(), Some(5));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Connection");
    assert!(err["error"]["hint"].is_string());
}

#[test]
fn invalid_store_locator_is_argument_error() {
    let output = run("ftp://example.com", &["table", "list"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn gateway_token_is_forwarded() {
    let server = TestServer::start_with_token(Some("cli-token")).expect("server");
    let store = server.base_url();

    let denied = run(store, &["table", "list"]);
    assert_eq!(denied.status.code(), Some(6));

    let allowed = cmd()
        .args(["--store", store, "table", "list"])
        .env("WIDECOL_TOKEN", "cli-token")
        .output()
        .expect("run widecol");
    assert!(allowed.status.success(), "{}", String::from_utf8_lossy(&allowed.stderr));
}

#[test]
fn version_and_completion() {
    let version = cmd().arg("version").output().expect("version");
    assert!(version.status.success());
    let value = stdout_json(&version);
    assert_eq!(value["name"], "widecol");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));

    let completion = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(completion.status.success());
    assert!(String::from_utf8_lossy(&completion.stdout).contains("widecol"));
}
