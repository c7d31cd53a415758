//! Purpose: Read `put-many` records from JSON Lines input.
//! Exports: `BatchRecord`, `read_puts`.
//! Role: Input adapter for batch writes; isolates parsing from command dispatch.
//! Invariants: One JSON object per non-blank line; any bad line fails the whole batch before writing.
//! Invariants: Row keys, qualifiers, and values accept `\xNN` escapes.
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read};

use serde::Deserialize;
use widecol::api::{Columns, Durability, Error, ErrorKind, Put};

use crate::render::unescape_bytes;

/// `{"row": "r1", "columns": {"cf:q": "v"}, "durability": "skip"}`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchRecord {
    pub row: String,
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub durability: Option<String>,
}

/// Parses every line into a put; `fallback` applies when a record names no durability.
pub fn read_puts<R: Read>(reader: R, fallback: Durability) -> Result<Vec<Put>, Error> {
    let reader = BufReader::new(reader);
    let mut puts = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|err| io_error(err, "failed to read batch input"))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BatchRecord = serde_json::from_str(&line).map_err(|err| {
            Error::new(ErrorKind::Argument)
                .with_message(format!("invalid batch record on line {line_no}"))
                .with_hint(r#"Each line needs {"row": "...", "columns": {"family:qualifier": "value"}}."#)
                .with_source(err)
        })?;
        let put = record_to_put(record, fallback)
            .map_err(|err| line_context(err, line_no))?;
        puts.push(put);
    }
    Ok(puts)
}

fn record_to_put(record: BatchRecord, fallback: Durability) -> Result<Put, Error> {
    let key = unescape_bytes(&record.row)?;
    let mut columns = Columns::new();
    for (column, value) in &record.columns {
        let (family, qualifier) = split_column_arg(column)?;
        columns.insert(family, qualifier, unescape_bytes(value)?);
    }
    if columns.is_empty() {
        return Err(Error::new(ErrorKind::Argument).with_message("record has no columns"));
    }
    let durability = match record.durability.as_deref() {
        Some(raw) => raw.parse::<Durability>()?,
        None => fallback,
    };
    Ok(Put::new(key, columns).with_durability(durability))
}

/// Splits a `family:qualifier` command-line column; the qualifier may carry escapes.
pub fn split_column_arg(column: &str) -> Result<(String, Vec<u8>), Error> {
    let (family, qualifier) = column.split_once(':').ok_or_else(|| {
        Error::new(ErrorKind::Argument)
            .with_message(format!("column '{column}' must look like family:qualifier"))
    })?;
    if family.trim().is_empty() {
        return Err(Error::new(ErrorKind::Argument)
            .with_message(format!("column '{column}' has an empty family")));
    }
    Ok((family.to_string(), unescape_bytes(qualifier)?))
}

fn line_context(err: Error, line_no: usize) -> Error {
    let message = match err.message() {
        Some(message) => format!("line {line_no}: {message}"),
        None => format!("line {line_no}: invalid batch record"),
    };
    err.with_message(message)
}

fn io_error(err: io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{read_puts, split_column_arg};
    use widecol::api::{Durability, ErrorKind};

    #[test]
    fn reads_jsonl_records() {
        let input = concat!(
            "{\"row\":\"r1\",\"columns\":{\"cf:a\":\"1\",\"cf:b\":\"2\"}}\n",
            "\n",
            "{\"row\":\"r\\\\x002\",\"columns\":{\"cf:a\":\"3\"},\"durability\":\"skip_wal\"}\n",
        );
        let puts = read_puts(input.as_bytes(), Durability::Sync).expect("puts");
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0].key, b"r1");
        assert_eq!(puts[0].columns.len(), 2);
        assert_eq!(puts[0].durability, Durability::Sync);
        assert_eq!(puts[1].key, b"r\x002");
        assert_eq!(puts[1].durability, Durability::Skip);
    }

    #[test]
    fn bad_line_reports_line_number() {
        let input = "{\"row\":\"r1\",\"columns\":{\"cf:a\":\"1\"}}\n{\"row\":\"r2\",\"columns\":{\"nocolon\":\"1\"}}\n";
        let err = read_puts(input.as_bytes(), Durability::Sync).expect_err("bad column");
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert!(err.message().is_some_and(|m| m.starts_with("line 2:")));

        let err = read_puts("not json\n".as_bytes(), Durability::Sync).expect_err("bad json");
        assert!(err.message().is_some_and(|m| m.contains("line 1")));
    }

    #[test]
    fn empty_columns_are_rejected() {
        let input = "{\"row\":\"r1\",\"columns\":{}}\n";
        let err = read_puts(input.as_bytes(), Durability::Sync).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn split_column_arg_keeps_colons_in_qualifier() {
        let (family, qualifier) = split_column_arg("cf:a:b").expect("split");
        assert_eq!(family, "cf");
        assert_eq!(qualifier, b"a:b");
        assert!(split_column_arg(":q").is_err());
        assert!(split_column_arg("cf").is_err());
    }
}
