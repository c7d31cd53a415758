//! Purpose: JSON bodies of the REST gateway protocol and their model conversions.
//! Exports: `CellSet`, `TableSchema`, `TableList`, `ScannerRequest`, `ErrorEnvelope`, `VersionInfo`.
//! Role: Shared by the REST client and the development gateway server.
//! Invariants: Row keys, columns, and values travel base64-encoded; names are plain strings.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::model::{
    Cell, DEFAULT_MAX_VERSIONS, FamilyDescriptor, Put, Row, TableDescriptor, TableName,
    split_column,
};
use crate::core::store::ApiResult;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CellSet {
    #[serde(rename = "Row", default)]
    pub rows: Vec<RowEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RowEntry {
    pub key: String,
    #[serde(rename = "Cell", default)]
    pub cells: Vec<CellEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CellEntry {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(rename = "$")]
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(rename = "ColumnSchema", default)]
    pub columns: Vec<ColumnSchema>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "VERSIONS", default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TableList {
    #[serde(default)]
    pub table: Vec<TableListEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableListEntry {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_row: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_row: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    pub server: String,
    pub rest: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

pub fn encode(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

pub fn decode(raw: &str, field: &str) -> ApiResult<Vec<u8>> {
    BASE64_STANDARD.decode(raw).map_err(|err| {
        Error::new(ErrorKind::Argument)
            .with_message(format!("field '{field}' is not valid base64"))
            .with_source(err)
    })
}

impl CellSet {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a Row>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| RowEntry {
                key: encode(&row.key),
                cells: row
                    .cells
                    .iter()
                    .map(|cell| CellEntry {
                        column: encode(&cell.column()),
                        timestamp: Some(cell.timestamp),
                        value: encode(&cell.value),
                    })
                    .collect(),
            })
            .collect();
        Self { rows }
    }

    pub fn from_puts(puts: &[Put]) -> Self {
        let rows = puts
            .iter()
            .map(|put| RowEntry {
                key: encode(&put.key),
                cells: put
                    .columns
                    .iter()
                    .map(|(family, qualifier, value)| CellEntry {
                        column: encode(&crate::core::model::column_bytes(family, qualifier)),
                        timestamp: None,
                        value: encode(value),
                    })
                    .collect(),
            })
            .collect();
        Self { rows }
    }

    pub fn into_rows(self) -> ApiResult<Vec<Row>> {
        self.rows.into_iter().map(RowEntry::into_row).collect()
    }
}

impl RowEntry {
    pub fn into_row(self) -> ApiResult<Row> {
        let key = decode(&self.key, "key")?;
        let cells = self
            .cells
            .into_iter()
            .map(|cell| {
                let (family, qualifier) = split_column(&decode(&cell.column, "column")?)?;
                Ok(Cell {
                    row: key.clone(),
                    family,
                    qualifier,
                    value: decode(&cell.value, "$")?,
                    timestamp: cell.timestamp.unwrap_or(0),
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;
        let mut row = Row { key, cells };
        row.sort_cells();
        Ok(row)
    }
}

impl TableSchema {
    pub fn from_descriptor(descriptor: &TableDescriptor) -> Self {
        Self {
            name: descriptor.name().as_str().to_string(),
            columns: descriptor
                .families()
                .iter()
                .map(|family| ColumnSchema {
                    name: family.name().to_string(),
                    versions: Some(family.max_versions().to_string()),
                })
                .collect(),
        }
    }

    pub fn into_descriptor(self) -> ApiResult<TableDescriptor> {
        let name = TableName::parse(&self.name)?;
        let families = self
            .columns
            .into_iter()
            .map(|column| {
                let versions = match column.versions.as_deref() {
                    Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                        Error::new(ErrorKind::Schema)
                            .with_message(format!("invalid VERSIONS '{raw}' for family '{}'", column.name))
                    })?,
                    None => DEFAULT_MAX_VERSIONS,
                };
                Ok(FamilyDescriptor::new(column.name)?.with_max_versions(versions))
            })
            .collect::<ApiResult<Vec<_>>>()?;
        TableDescriptor::new(name, families)
    }
}

impl ErrorEnvelope {
    pub fn from_error(err: &Error) -> Self {
        Self {
            error: ErrorBody {
                kind: format!("{:?}", err.kind()),
                message: err.message().map(str::to_string),
                hint: err.hint().map(str::to_string),
                table: err.table().map(str::to_string),
            },
        }
    }

    pub fn into_error(self) -> Error {
        let body = self.error;
        let mut err = Error::new(parse_error_kind(&body.kind));
        if let Some(message) = body.message {
            err = err.with_message(message);
        }
        if let Some(hint) = body.hint {
            err = err.with_hint(hint);
        }
        if let Some(table) = body.table {
            err = err.with_table(table);
        }
        err
    }
}

pub fn parse_error_kind(kind: &str) -> ErrorKind {
    match kind {
        "Argument" => ErrorKind::Argument,
        "Connection" => ErrorKind::Connection,
        "Schema" => ErrorKind::Schema,
        "NotFound" => ErrorKind::NotFound,
        "AlreadyExists" => ErrorKind::AlreadyExists,
        "Permission" => ErrorKind::Permission,
        "Io" => ErrorKind::Io,
        _ => ErrorKind::Internal,
    }
}
