//! Purpose: `widecol` CLI entry point.
//! Role: Binary crate root; parses args, initializes logging, delegates to command dispatch.
//! Invariants: Commands print human tables on a terminal and JSON otherwise.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{
    Args, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod batch_input;
mod command_dispatch;
mod filter_expr;
mod render;
mod serve;

use widecol::api::config::{DEFAULT_SCANNER_BATCH, DEFAULT_STORE, parse_duration};
use widecol::api::{Columns, Error, ErrorKind, StoreConfig, to_exit_code};
use widecol::notice::{Notice, notice_json};

use batch_input::split_column_arg;
use render::unescape_bytes;

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Argument)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let default_filter = if matches!(cli.command, Command::Serve(_)) {
        "info"
    } else {
        "warn"
    };
    init_tracing(default_filter);

    command_dispatch::dispatch_command(cli)
        .map_err(add_connection_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "widecol",
    version,
    about = "Table admin and row access for HBase-style wide-column stores",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Tables hold rows addressed by byte keys. Each row holds cells addressed
by family:qualifier. Rows come back in ascending key order.
"#,
    after_help = r#"EXAMPLES
  $ widecol serve                                 # Terminal 1: dev gateway on 127.0.0.1:8080
  $ widecol table create t1 cf1 cf2               # Terminal 2
  $ widecol put t1 r1 --col cf1:a=1 --col cf2:b=2
  $ widecol get t1 r1
  $ widecol scan t1 --start r0 --stop r9

  Byte keys and values accept \xNN escapes, e.g. `widecol get t1 'r\x001'`.

LEARN MORE
  $ widecol <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "WIDECOL_STORE",
        default_value = DEFAULT_STORE,
        help = "Store locator: `memory` or a gateway URL"
    )]
    store: String,
    #[arg(
        long,
        global = true,
        env = "WIDECOL_TOKEN",
        hide_env_values = true,
        help = "Bearer token sent to the gateway; `serve` requires it from clients"
    )]
    token: Option<String>,
    #[arg(long, global = true, help = "Gateway request timeout (e.g. 500ms, 30s)")]
    timeout: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Cells fetched per scanner round trip",
        default_value_t = DEFAULT_SCANNER_BATCH
    )]
    scanner_batch: u32,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Create, drop, and inspect tables",
        after_help = r#"EXAMPLES
  $ widecol table create t1 cf1 cf2
  $ widecol table list
  $ widecol table describe t1
  $ widecol table delete t1"#
    )]
    Table {
        #[command(subcommand)]
        command: TableCommand,
    },
    #[command(
        about = "Write one row",
        after_help = r#"EXAMPLES
  $ widecol put t1 r1 --col cf1:a=1 --col cf1:b=2
  $ widecol put t1 r2 --col cf1:a=x --durability skip"#
    )]
    Put {
        #[arg(help = "Table name")]
        table: String,
        #[arg(help = "Row key")]
        key: String,
        #[arg(
            long = "col",
            value_name = "FAMILY:QUALIFIER=VALUE",
            required = true,
            help = "Cell to write (repeatable)"
        )]
        cols: Vec<String>,
        #[arg(
            long,
            default_value = "sync",
            help = "Write-ahead-log level: async|sync|fsync|skip|default"
        )]
        durability: String,
    },
    #[command(
        name = "put-many",
        about = "Write rows from JSON Lines",
        long_about = r#"Write rows from JSON Lines, one record per line:

  {"row": "r1", "columns": {"cf1:a": "1", "cf2:b": "2"}, "durability": "skip"}

Every line is validated before anything is written."#,
        after_help = r#"EXAMPLES
  $ widecol put-many t1 --file rows.jsonl
  $ cat rows.jsonl | widecol put-many t1"#
    )]
    PutMany {
        #[arg(help = "Table name")]
        table: String,
        #[arg(long, help = "Read records from a file instead of stdin", value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
        #[arg(
            long,
            default_value = "sync",
            help = "Durability for records that do not name one"
        )]
        durability: String,
    },
    #[command(
        about = "Read one row",
        after_help = r#"EXAMPLES
  $ widecol get t1 r1
  $ widecol get t1 r1 --family cf1 --qualifier a"#
    )]
    Get {
        #[arg(help = "Table name")]
        table: String,
        #[arg(help = "Row key")]
        key: String,
        #[command(flatten)]
        columns: ColumnArgs,
    },
    #[command(
        about = "Read rows in key order",
        long_about = r#"Read rows in ascending key order.

The range is [--start, --stop): start inclusive, stop exclusive. Either may be omitted."#,
        after_help = r#"EXAMPLES
  $ widecol scan t1
  $ widecol scan t1 --start r1 --stop r5 --family cf1
  $ widecol scan t1 --filter "PrefixFilter('user') AND ValueFilter(=, 'binary:x')""#
    )]
    Scan {
        #[arg(help = "Table name")]
        table: String,
        #[command(flatten)]
        columns: ColumnArgs,
        #[arg(long, help = "First row key (inclusive)")]
        start: Option<String>,
        #[arg(long, help = "Last row key (exclusive)")]
        stop: Option<String>,
        #[arg(long, help = "Filter expression in the HBase filter language")]
        filter: Option<String>,
        #[arg(long, help = "Stop after N rows")]
        limit: Option<usize>,
    },
    #[command(
        about = "Delete whole rows",
        after_help = r#"EXAMPLES
  $ widecol delete t1 r1 r2"#
    )]
    Delete {
        #[arg(help = "Table name")]
        table: String,
        #[arg(required = true, help = "Row keys")]
        keys: Vec<String>,
    },
    #[command(
        about = "Run a development gateway backed by an in-memory store",
        long_about = r#"Run a development REST gateway backed by an in-memory store.

Data lives only as long as the process. Point clients at it with --store."#,
        after_help = r#"EXAMPLES
  $ widecol serve
  $ widecol serve --bind 127.0.0.1:9090 --token secret"#
    )]
    Serve(ServeArgs),
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ widecol completion bash > ~/.local/share/bash-completion/completions/widecol
  $ widecol completion zsh > ~/.zfunc/_widecol"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

#[derive(Subcommand)]
enum TableCommand {
    #[command(about = "List table names")]
    List,
    #[command(about = "Create a table unless it already exists")]
    Create {
        #[arg(help = "Table name")]
        name: String,
        #[arg(required = true, help = "Column family names")]
        families: Vec<String>,
    },
    #[command(about = "Disable and drop a table if it exists")]
    Delete {
        #[arg(help = "Table name")]
        name: String,
    },
    #[command(about = "Report whether a table exists")]
    Exists {
        #[arg(help = "Table name")]
        name: String,
    },
    #[command(about = "Show a table's families and state")]
    Describe {
        #[arg(help = "Table name")]
        name: String,
    },
    #[command(about = "Enable a disabled table")]
    Enable {
        #[arg(help = "Table name")]
        name: String,
    },
}

#[derive(Args)]
struct ColumnArgs {
    #[arg(long, help = "Restrict to one column family")]
    family: Option<String>,
    #[arg(long, requires = "family", help = "Restrict to one qualifier within --family")]
    qualifier: Option<String>,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = DEFAULT_BIND, help = "Bind address")]
    bind: String,
    #[arg(long, help = "Allow binding to non-loopback addresses")]
    allow_non_loopback: bool,
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES, help = "Maximum request body size in bytes")]
    max_body_bytes: u64,
}

fn store_config(
    store: &str,
    token: Option<String>,
    timeout: Option<&str>,
    scanner_batch: u32,
) -> Result<StoreConfig, Error> {
    let timeout = parse_timeout(timeout)?;
    StoreConfig::parse(store)?.with_rest_options(token, timeout, Some(scanner_batch))
}

fn parse_timeout(raw: Option<&str>) -> Result<Option<Duration>, Error> {
    raw.map(parse_duration).transpose()
}

/// Parses `family:qualifier=value` cells given to `put --col`.
fn parse_col_args(cols: &[String]) -> Result<Columns, Error> {
    let mut columns = Columns::new();
    for raw in cols {
        let (column, value) = raw.split_once('=').ok_or_else(|| {
            Error::new(ErrorKind::Argument)
                .with_message(format!("cell '{raw}' must look like family:qualifier=value"))
                .with_hint("Example: --col cf1:name=alice")
        })?;
        let (family, qualifier) = split_column_arg(column)?;
        columns.insert(family, qualifier, unescape_bytes(value)?);
    }
    Ok(columns)
}

fn add_connection_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Connection || err.hint().is_some() {
        return err;
    }
    err.with_hint("Start a gateway with `widecol serve`, or use --store memory.")
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("widecol {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(json!({
            "name": "widecol",
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
}

fn emit_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", render::render_table(headers, rows));
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (table: {})", notice.message, notice.table);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Argument => "invalid argument".to_string(),
        ErrorKind::Connection => "store unreachable".to_string(),
        ErrorKind::Schema => "schema error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(row) = err.row() {
        inner.insert("row".to_string(), json!(render::escape_bytes(row)));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(table) = err.table() {
        lines.push(format!(
            "{} {table}",
            colorize_label("table:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(row) = err.row() {
        lines.push(format!(
            "{} {}",
            colorize_label("row:", use_color, AnsiColor::Yellow),
            render::escape_bytes(row)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `widecol --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "widecol") else {
        return "Try `widecol --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }

    if parts.is_empty() {
        return "Try `widecol --help`.".to_string();
    }
    format!("Try `widecol {} --help`.", parts.join(" "))
}
