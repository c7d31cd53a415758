//! Purpose: Render cells, rows, and schemas for terminals and for JSON consumers.
//! Exports: `escape_bytes`, `unescape_bytes`, `cell_json`, `row_json`, `render_table`, `format_timestamp_ms`.
//! Role: Shared output helpers for `widecol` commands.
//! Invariants: Bytes render as printable ASCII with `\xNN` escapes; `unescape_bytes` inverts it.

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use widecol::api::{Cell, Error, ErrorKind, Row, TableDescriptor};

/// Printable ASCII stays as-is, everything else (and `\`) becomes `\xNN`.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if (0x20..0x7f).contains(&byte) && byte != b'\\' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("\\x{byte:02X}"));
        }
    }
    out
}

/// Decodes `\xNN` escapes (and `\\`) in command-line keys and values.
pub fn unescape_bytes(raw: &str) -> Result<Vec<u8>, Error> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(b'x') | Some(b'X') => {
                let hex = bytes
                    .get(i + 2..i + 4)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Argument)
                            .with_message(format!("invalid byte escape in '{raw}'"))
                            .with_hint("Escapes look like \\x00; write \\\\ for a backslash.")
                    })?;
                out.push(hex);
                i += 4;
            }
            _ => {
                out.push(b'\\');
                i += 1;
            }
        }
    }
    Ok(out)
}

pub fn format_timestamp_ms(timestamp: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn cell_json(cell: &Cell) -> Value {
    json!({
        "row": escape_bytes(&cell.row),
        "family": cell.family,
        "qualifier": escape_bytes(&cell.qualifier),
        "value": escape_bytes(&cell.value),
        "timestamp": cell.timestamp,
        "time": format_timestamp_ms(cell.timestamp),
    })
}

pub fn row_json(row: &Row) -> Value {
    let cells: Vec<Value> = row
        .cells
        .iter()
        .map(|cell| {
            json!({
                "family": cell.family,
                "qualifier": escape_bytes(&cell.qualifier),
                "value": escape_bytes(&cell.value),
                "timestamp": cell.timestamp,
            })
        })
        .collect();
    json!({
        "row": escape_bytes(&row.key),
        "cells": cells,
    })
}

pub fn descriptor_json(descriptor: &TableDescriptor) -> Value {
    let families: Vec<Value> = descriptor
        .families()
        .iter()
        .map(|family| {
            json!({
                "name": family.name(),
                "max_versions": family.max_versions(),
            })
        })
        .collect();
    json!({
        "table": descriptor.name().as_str(),
        "enabled": descriptor.is_enabled(),
        "families": families,
        "description": descriptor.to_string(),
    })
}

/// One table line per cell, in the shell's `ROW  COLUMN+CELL` layout.
pub fn cell_table_rows(cells: &[Cell]) -> Vec<Vec<String>> {
    cells
        .iter()
        .map(|cell| {
            vec![
                escape_bytes(&cell.row),
                format!(
                    "column={}:{}, timestamp={}, value={}",
                    cell.family,
                    escape_bytes(&cell.qualifier),
                    format_timestamp_ms(cell.timestamp),
                    escape_bytes(&cell.value)
                ),
            ]
        })
        .collect()
}

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let column_count = headers.len();
    let mut sanitized_rows = Vec::with_capacity(rows.len());
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();

    for row in rows {
        let mut sanitized = Vec::with_capacity(column_count);
        for (idx, width) in widths.iter_mut().enumerate() {
            let value = row.get(idx).map(String::as_str).unwrap_or("");
            let cleaned = value.replace('\n', "\\n").replace('\r', "\\r");
            *width = (*width).max(cleaned.chars().count());
            sanitized.push(cleaned);
        }
        sanitized_rows.push(sanitized);
    }

    let mut lines = Vec::with_capacity(sanitized_rows.len() + 1);
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    lines.push(format_table_line(&header_cells, &widths));
    for row in sanitized_rows {
        lines.push(format_table_line(&row, &widths));
    }
    lines.join("\n")
}

fn format_table_line(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (idx, width) in widths.iter().enumerate() {
        if idx > 0 {
            line.push_str("  ");
        }
        let cell = cells.get(idx).map(String::as_str).unwrap_or("");
        line.push_str(cell);
        let cell_len = cell.chars().count();
        // Skip trailing padding on the last column.
        if *width > cell_len && idx + 1 < widths.len() {
            line.push_str(&" ".repeat(*width - cell_len));
        }
    }
    line
}
