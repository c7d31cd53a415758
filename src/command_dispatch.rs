//! Purpose: Hold top-level CLI command dispatch for `widecol`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Store commands run through one `TableFacade`, which is always closed afterwards.
//! Invariants: A command error wins over a close error; the close error is logged.

use std::fs::File;
use std::io::{self, IsTerminal, Read};
use std::net::SocketAddr;

use clap::CommandFactory;
use serde_json::json;
use widecol::api::{
    Cell, ColumnSelector, Connector, CreateOutcome, DeleteOutcome, Durability, Error, ErrorKind,
    MemoryConnector, RestConnector, Row, RowScanner, ScanSpec, StoreConfig, TableFacade,
};
use widecol::notice::Notice;

use super::{
    Cli, ColorMode, ColumnArgs, Command, RunOutcome, TableCommand, emit_json, emit_notice,
    emit_table, emit_version_output, parse_col_args, serve, store_config,
};
use crate::batch_input::read_puts;
use crate::filter_expr::parse_filter;
use crate::render::{
    cell_json, cell_table_rows, descriptor_json, escape_bytes, row_json, unescape_bytes,
};

pub(super) fn dispatch_command(cli: Cli) -> Result<RunOutcome, Error> {
    let Cli {
        store,
        token,
        timeout,
        scanner_batch,
        color,
        command,
    } = cli;
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "widecol", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let bind: SocketAddr = args.bind.parse().map_err(|_| {
                Error::new(ErrorKind::Argument)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:8080.")
            })?;
            let config = serve::ServeConfig {
                bind,
                token: token.filter(|token| !token.trim().is_empty()),
                allow_non_loopback: args.allow_non_loopback,
                max_body_bytes: args.max_body_bytes,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        command => match store_config(&store, token, timeout.as_deref(), scanner_batch)? {
            StoreConfig::Memory => {
                tracing::debug!("using in-process memory store; data ends with this command");
                run_store_command(TableFacade::new(MemoryConnector::new()), command, color)
            }
            StoreConfig::Rest(config) => {
                tracing::debug!(base_url = %config.base_url, "using gateway store");
                run_store_command(TableFacade::new(RestConnector::new(config)), command, color)
            }
        },
    }
}

fn run_store_command<C: Connector>(
    mut facade: TableFacade<C>,
    command: Command,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    let result = execute(&mut facade, command, color_mode);
    let closed = facade.close();
    match (result, closed) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "failed to close store handle");
            Err(err)
        }
    }
}

fn execute<C: Connector>(
    facade: &mut TableFacade<C>,
    command: Command,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Table { command } => table_command(facade, command, color_mode),
        Command::Put {
            table,
            key,
            cols,
            durability,
        } => {
            let key = unescape_bytes(&key)?;
            let columns = parse_col_args(&cols)?;
            let durability = durability.parse::<Durability>()?;
            let cells = columns.len();
            facade.put_one(&table, key.clone(), columns, durability)?;
            emit_json(json!({
                "table": table,
                "row": escape_bytes(&key),
                "cells": cells,
                "durability": durability.as_str(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::PutMany {
            table,
            file,
            durability,
        } => {
            let durability = durability.parse::<Durability>()?;
            let reader: Box<dyn Read> = match &file {
                Some(path) => Box::new(File::open(path).map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message(format!("failed to open {}", path.display()))
                        .with_source(err)
                })?),
                None => {
                    if io::stdin().is_terminal() {
                        return Err(Error::new(ErrorKind::Argument)
                            .with_message("put-many needs records on stdin or --file")
                            .with_hint("Pipe JSON Lines in, e.g. `cat rows.jsonl | widecol put-many t1`."));
                    }
                    Box::new(io::stdin())
                }
            };
            let puts = read_puts(reader, durability)?;
            let rows = puts.len();
            facade.put_many(&table, puts)?;
            emit_json(json!({ "table": table, "rows": rows }));
            Ok(RunOutcome::ok())
        }
        Command::Get {
            table,
            key,
            columns,
        } => {
            let key = unescape_bytes(&key)?;
            let (family, qualifier) = column_parts(&columns)?;
            let cells = facade.get_row(&table, &key, family.as_deref(), qualifier.as_deref())?;
            emit_cells(&key, cells);
            Ok(RunOutcome::ok())
        }
        Command::Scan {
            table,
            columns,
            start,
            stop,
            filter,
            limit,
        } => {
            let (family, qualifier) = column_parts(&columns)?;
            let mut spec = ScanSpec::new().with_columns(ColumnSelector::from_parts(
                family.as_deref(),
                qualifier.as_deref(),
            ));
            if let Some(start) = start.as_deref() {
                spec = spec.with_start(unescape_bytes(start)?);
            }
            if let Some(stop) = stop.as_deref() {
                spec = spec.with_stop(unescape_bytes(stop)?);
            }
            if let Some(filter) = filter.as_deref() {
                spec = spec.with_filter(parse_filter(filter)?);
            }
            let mut scanner = facade.scan(&table, &spec)?;
            let result = emit_scan(&mut scanner, limit);
            let closed = scanner.close();
            let count = result?;
            closed?;
            tracing::debug!(table = %table, rows = count, "scan finished");
            Ok(RunOutcome::ok())
        }
        Command::Delete { table, keys } => {
            let keys = keys
                .iter()
                .map(|key| unescape_bytes(key))
                .collect::<Result<Vec<_>, _>>()?;
            match keys.as_slice() {
                [key] => facade.delete_row(&table, key)?,
                _ => facade.delete_rows(&table, &keys)?,
            }
            emit_json(json!({ "table": table, "deleted": keys.len() }));
            Ok(RunOutcome::ok())
        }
        Command::Serve(_) | Command::Completion { .. } | Command::Version => {
            Err(Error::new(ErrorKind::Internal).with_message("command does not use a store"))
        }
    }
}

fn table_command<C: Connector>(
    facade: &mut TableFacade<C>,
    command: TableCommand,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        TableCommand::List => {
            let names = facade.list_table_names()?;
            if io::stdout().is_terminal() {
                let rows: Vec<Vec<String>> = names.iter().map(|name| vec![name.clone()]).collect();
                emit_table(&["TABLE"], &rows);
                println!("{} table(s)", names.len());
            } else {
                emit_json(json!({ "tables": names }));
            }
            Ok(RunOutcome::ok())
        }
        TableCommand::Create { name, families } => {
            let created = match facade.create_table(&name, &families)? {
                CreateOutcome::Created => true,
                CreateOutcome::AlreadyExists => {
                    emit_notice(
                        &Notice::now(
                            "table_exists",
                            "table create",
                            &name,
                            "table already exists; nothing created",
                        )
                        .with_detail("families", families.clone()),
                        color_mode,
                    );
                    false
                }
            };
            emit_json(json!({
                "table": name,
                "created": created,
                "families": families,
            }));
            Ok(RunOutcome::ok())
        }
        TableCommand::Delete { name } => {
            let deleted = match facade.delete_table(&name)? {
                DeleteOutcome::Deleted => true,
                DeleteOutcome::Missing => {
                    emit_notice(
                        &Notice::now(
                            "table_missing",
                            "table delete",
                            &name,
                            "table does not exist; nothing deleted",
                        ),
                        color_mode,
                    );
                    false
                }
            };
            emit_json(json!({ "table": name, "deleted": deleted }));
            Ok(RunOutcome::ok())
        }
        TableCommand::Exists { name } => {
            let exists = facade.table_exists(&name)?;
            emit_json(json!({ "table": name, "exists": exists }));
            Ok(RunOutcome::ok())
        }
        TableCommand::Describe { name } => {
            let descriptor = facade.describe_table(&name)?;
            if io::stdout().is_terminal() {
                println!("{descriptor}");
            } else {
                emit_json(descriptor_json(&descriptor));
            }
            Ok(RunOutcome::ok())
        }
        TableCommand::Enable { name } => {
            facade.enable_table(&name)?;
            emit_json(json!({ "table": name, "enabled": true }));
            Ok(RunOutcome::ok())
        }
    }
}

fn column_parts(args: &ColumnArgs) -> Result<(Option<String>, Option<Vec<u8>>), Error> {
    let qualifier = args.qualifier.as_deref().map(unescape_bytes).transpose()?;
    Ok((args.family.clone(), qualifier))
}

fn emit_cells(key: &[u8], cells: Vec<Cell>) {
    if io::stdout().is_terminal() {
        let rows: Vec<Vec<String>> = cell_table_rows(&cells)
            .into_iter()
            .map(|mut row| row.split_off(1))
            .collect();
        emit_table(&["COLUMN+CELL"], &rows);
        println!("{} cell(s)", cells.len());
        return;
    }
    emit_json(json!({
        "row": escape_bytes(key),
        "cells": cells.iter().map(cell_json).collect::<Vec<_>>(),
    }));
}

/// Prints rows as they arrive; JSON lines off a terminal, a table on one.
fn emit_scan<S: RowScanner>(scanner: &mut S, limit: Option<usize>) -> Result<usize, Error> {
    let is_tty = io::stdout().is_terminal();
    let mut table_rows = Vec::new();
    let mut count = 0;
    for row in scanner.by_ref().take(limit.unwrap_or(usize::MAX)) {
        let row: Row = row?;
        count += 1;
        if is_tty {
            table_rows.extend(cell_table_rows(&row.cells));
        } else {
            println!("{}", row_json(&row));
        }
    }
    if is_tty {
        emit_table(&["ROW", "COLUMN+CELL"], &table_rows);
        println!("{count} row(s)");
    }
    Ok(count)
}
