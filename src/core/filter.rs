//! Purpose: Define scan filters understood by the backing stores.
//! Exports: `Filter`, `CompareOp`, `Comparator`, `ListOperator`, `RowMatcher`.
//! Role: The facade passes filters through untouched; stores either evaluate them
//! (`RowMatcher`, in-memory store) or ship them as the gateway's JSON filter model.
//! Invariants: Wire names follow the HBase filter model (`PrefixFilter`, `EQUAL`, ...).
//! Invariants: Byte operands are base64 on the wire except substring comparators.

use std::cmp::Ordering;
use std::fmt;

use base64::prelude::*;
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::model::Row;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
}

impl CompareOp {
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessOrEqual => ordering != Ordering::Greater,
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::GreaterOrEqual => ordering != Ordering::Less,
            CompareOp::Greater => ordering == Ordering::Greater,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "!=",
            CompareOp::GreaterOrEqual => ">=",
            CompareOp::Greater => ">",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(CompareOp::Less),
            "<=" => Some(CompareOp::LessOrEqual),
            "=" => Some(CompareOp::Equal),
            "!=" => Some(CompareOp::NotEqual),
            ">=" => Some(CompareOp::GreaterOrEqual),
            ">" => Some(CompareOp::Greater),
            _ => None,
        }
    }

    fn wire_name(self) -> &'static str {
        match self {
            CompareOp::Less => "LESS",
            CompareOp::LessOrEqual => "LESS_OR_EQUAL",
            CompareOp::Equal => "EQUAL",
            CompareOp::NotEqual => "NOT_EQUAL",
            CompareOp::GreaterOrEqual => "GREATER_OR_EQUAL",
            CompareOp::Greater => "GREATER",
        }
    }

    fn from_wire_name(name: &str) -> Result<Self, Error> {
        match name {
            "LESS" => Ok(CompareOp::Less),
            "LESS_OR_EQUAL" => Ok(CompareOp::LessOrEqual),
            "EQUAL" => Ok(CompareOp::Equal),
            "NOT_EQUAL" => Ok(CompareOp::NotEqual),
            "GREATER_OR_EQUAL" => Ok(CompareOp::GreaterOrEqual),
            "GREATER" => Ok(CompareOp::Greater),
            other => Err(filter_model_error(format!("unknown compare op '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Comparator {
    Binary(Vec<u8>),
    BinaryPrefix(Vec<u8>),
    /// Case-insensitive containment; only `=` and `!=` are meaningful.
    Substring(String),
}

impl Comparator {
    /// Orders `candidate` relative to the operand.
    pub fn compare(&self, candidate: &[u8]) -> Ordering {
        match self {
            Comparator::Binary(operand) => candidate.cmp(operand.as_slice()),
            Comparator::BinaryPrefix(operand) => {
                let len = operand.len().min(candidate.len());
                candidate[..len].cmp(operand.as_slice())
            }
            Comparator::Substring(needle) => {
                let haystack = candidate.to_ascii_lowercase();
                if haystack.contains_str(needle.to_ascii_lowercase()) {
                    Ordering::Equal
                } else {
                    Ordering::Greater
                }
            }
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Binary(value) => write!(f, "'binary:{}'", quote_bytes(value)),
            Comparator::BinaryPrefix(value) => write!(f, "'binaryprefix:{}'", quote_bytes(value)),
            Comparator::Substring(value) => write!(f, "'substring:{}'", value.replace('\'', "''")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListOperator {
    MustPassAll,
    MustPassOne,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Filter {
    /// Rows whose key starts with the prefix.
    Prefix(Vec<u8>),
    Row {
        op: CompareOp,
        comparator: Comparator,
    },
    /// Keeps only cells whose value passes; rows left without cells are dropped.
    Value {
        op: CompareOp,
        comparator: Comparator,
    },
    ColumnPrefix(Vec<u8>),
    /// Tests one column of the row. Rows missing the column pass unless `filter_if_missing`.
    SingleColumnValue {
        family: String,
        qualifier: Vec<u8>,
        op: CompareOp,
        comparator: Comparator,
        filter_if_missing: bool,
    },
    KeyOnly,
    FirstKeyOnly,
    Page(u64),
    List {
        operator: ListOperator,
        filters: Vec<Filter>,
    },
}

impl Filter {
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Filter::Prefix(prefix.into())
    }

    pub fn all(filters: Vec<Filter>) -> Self {
        Filter::List {
            operator: ListOperator::MustPassAll,
            filters,
        }
    }

    pub fn any(filters: Vec<Filter>) -> Self {
        Filter::List {
            operator: ListOperator::MustPassOne,
            filters,
        }
    }

    pub fn value_eq(value: impl Into<Vec<u8>>) -> Self {
        Filter::Value {
            op: CompareOp::Equal,
            comparator: Comparator::Binary(value.into()),
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(&self.to_model()).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode filter json")
                .with_source(err)
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let model: FilterModel = serde_json::from_str(raw).map_err(|err| {
            Error::new(ErrorKind::Argument)
                .with_message("invalid filter json")
                .with_source(err)
        })?;
        Self::from_model(model)
    }

    fn to_model(&self) -> FilterModel {
        match self {
            Filter::Prefix(prefix) => FilterModel {
                value: Some(BASE64_STANDARD.encode(prefix)),
                ..FilterModel::named("PrefixFilter")
            },
            Filter::Row { op, comparator } => FilterModel {
                op: Some(op.wire_name().to_string()),
                comparator: Some(ComparatorModel::from_comparator(comparator)),
                ..FilterModel::named("RowFilter")
            },
            Filter::Value { op, comparator } => FilterModel {
                op: Some(op.wire_name().to_string()),
                comparator: Some(ComparatorModel::from_comparator(comparator)),
                ..FilterModel::named("ValueFilter")
            },
            Filter::ColumnPrefix(prefix) => FilterModel {
                value: Some(BASE64_STANDARD.encode(prefix)),
                ..FilterModel::named("ColumnPrefixFilter")
            },
            Filter::SingleColumnValue {
                family,
                qualifier,
                op,
                comparator,
                filter_if_missing,
            } => FilterModel {
                op: Some(op.wire_name().to_string()),
                comparator: Some(ComparatorModel::from_comparator(comparator)),
                family: Some(BASE64_STANDARD.encode(family.as_bytes())),
                qualifier: Some(BASE64_STANDARD.encode(qualifier)),
                if_missing: Some(*filter_if_missing),
                latest_version: Some(true),
                ..FilterModel::named("SingleColumnValueFilter")
            },
            Filter::KeyOnly => FilterModel::named("KeyOnlyFilter"),
            Filter::FirstKeyOnly => FilterModel::named("FirstKeyOnlyFilter"),
            Filter::Page(limit) => FilterModel {
                value: Some(limit.to_string()),
                ..FilterModel::named("PageFilter")
            },
            Filter::List { operator, filters } => FilterModel {
                op: Some(
                    match operator {
                        ListOperator::MustPassAll => "MUST_PASS_ALL",
                        ListOperator::MustPassOne => "MUST_PASS_ONE",
                    }
                    .to_string(),
                ),
                filters: Some(filters.iter().map(Filter::to_model).collect()),
                ..FilterModel::named("FilterList")
            },
        }
    }

    fn from_model(model: FilterModel) -> Result<Self, Error> {
        match model.kind.as_str() {
            "PrefixFilter" => Ok(Filter::Prefix(decode_b64(model.value.as_deref(), "value")?)),
            "ColumnPrefixFilter" => Ok(Filter::ColumnPrefix(decode_b64(
                model.value.as_deref(),
                "value",
            )?)),
            "RowFilter" => Ok(Filter::Row {
                op: required_op(&model)?,
                comparator: required_comparator(model.comparator)?,
            }),
            "ValueFilter" => Ok(Filter::Value {
                op: required_op(&model)?,
                comparator: required_comparator(model.comparator)?,
            }),
            "SingleColumnValueFilter" => {
                let op = required_op(&model)?;
                let family = decode_b64(model.family.as_deref(), "family")?;
                let family = String::from_utf8(family)
                    .map_err(|_| filter_model_error("family must be utf-8"))?;
                Ok(Filter::SingleColumnValue {
                    family,
                    qualifier: decode_b64(model.qualifier.as_deref(), "qualifier")?,
                    op,
                    comparator: required_comparator(model.comparator)?,
                    filter_if_missing: model.if_missing.unwrap_or(false),
                })
            }
            "KeyOnlyFilter" => Ok(Filter::KeyOnly),
            "FirstKeyOnlyFilter" => Ok(Filter::FirstKeyOnly),
            "PageFilter" => {
                let raw = model
                    .value
                    .ok_or_else(|| filter_model_error("PageFilter requires a value"))?;
                let limit = raw
                    .parse::<u64>()
                    .map_err(|_| filter_model_error(format!("invalid page size '{raw}'")))?;
                Ok(Filter::Page(limit))
            }
            "FilterList" => {
                let operator = match model.op.as_deref() {
                    Some("MUST_PASS_ONE") => ListOperator::MustPassOne,
                    Some("MUST_PASS_ALL") | None => ListOperator::MustPassAll,
                    Some(other) => {
                        return Err(filter_model_error(format!("unknown list op '{other}'")));
                    }
                };
                let filters = model
                    .filters
                    .unwrap_or_default()
                    .into_iter()
                    .map(Filter::from_model)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Filter::List { operator, filters })
            }
            other => Err(filter_model_error(format!("unsupported filter type '{other}'"))),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Prefix(prefix) => write!(f, "PrefixFilter('{}')", quote_bytes(prefix)),
            Filter::Row { op, comparator } => {
                write!(f, "RowFilter({}, {comparator})", op.symbol())
            }
            Filter::Value { op, comparator } => {
                write!(f, "ValueFilter({}, {comparator})", op.symbol())
            }
            Filter::ColumnPrefix(prefix) => {
                write!(f, "ColumnPrefixFilter('{}')", quote_bytes(prefix))
            }
            Filter::SingleColumnValue {
                family,
                qualifier,
                op,
                comparator,
                filter_if_missing,
            } => write!(
                f,
                "SingleColumnValueFilter('{}', '{}', {}, {comparator}, {filter_if_missing})",
                family.replace('\'', "''"),
                quote_bytes(qualifier),
                op.symbol()
            ),
            Filter::KeyOnly => write!(f, "KeyOnlyFilter()"),
            Filter::FirstKeyOnly => write!(f, "FirstKeyOnlyFilter()"),
            Filter::Page(limit) => write!(f, "PageFilter({limit})"),
            Filter::List { operator, filters } => {
                let joiner = match operator {
                    ListOperator::MustPassAll => " AND ",
                    ListOperator::MustPassOne => " OR ",
                };
                write!(f, "(")?;
                for (idx, filter) in filters.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "{joiner}")?;
                    }
                    write!(f, "{filter}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn quote_bytes(bytes: &[u8]) -> String {
    bytes.to_str_lossy().replace('\'', "''")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FilterModel {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comparator: Option<ComparatorModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filters: Option<Vec<FilterModel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qualifier: Option<String>,
    #[serde(rename = "ifMissing", default, skip_serializing_if = "Option::is_none")]
    if_missing: Option<bool>,
    #[serde(rename = "latestVersion", default, skip_serializing_if = "Option::is_none")]
    latest_version: Option<bool>,
}

impl FilterModel {
    fn named(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ComparatorModel {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

impl ComparatorModel {
    fn from_comparator(comparator: &Comparator) -> Self {
        match comparator {
            Comparator::Binary(value) => Self {
                kind: "BinaryComparator".to_string(),
                value: BASE64_STANDARD.encode(value),
            },
            Comparator::BinaryPrefix(value) => Self {
                kind: "BinaryPrefixComparator".to_string(),
                value: BASE64_STANDARD.encode(value),
            },
            Comparator::Substring(value) => Self {
                kind: "SubstringComparator".to_string(),
                value: value.clone(),
            },
        }
    }

    fn into_comparator(self) -> Result<Comparator, Error> {
        match self.kind.as_str() {
            "BinaryComparator" => Ok(Comparator::Binary(decode_b64(Some(self.value.as_str()), "value")?)),
            "BinaryPrefixComparator" => Ok(Comparator::BinaryPrefix(decode_b64(
                Some(self.value.as_str()),
                "value",
            )?)),
            "SubstringComparator" => Ok(Comparator::Substring(self.value)),
            other => Err(filter_model_error(format!("unsupported comparator '{other}'"))),
        }
    }
}

fn required_op(model: &FilterModel) -> Result<CompareOp, Error> {
    let op = model
        .op
        .as_deref()
        .ok_or_else(|| filter_model_error(format!("{} requires an op", model.kind)))?;
    CompareOp::from_wire_name(op)
}

fn required_comparator(model: Option<ComparatorModel>) -> Result<Comparator, Error> {
    model
        .ok_or_else(|| filter_model_error("filter requires a comparator"))?
        .into_comparator()
}

fn decode_b64(value: Option<&str>, field: &str) -> Result<Vec<u8>, Error> {
    let value = value.ok_or_else(|| filter_model_error(format!("missing field '{field}'")))?;
    BASE64_STANDARD.decode(value).map_err(|err| {
        Error::new(ErrorKind::Argument)
            .with_message(format!("filter field '{field}' is not valid base64"))
            .with_source(err)
    })
}

fn filter_model_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Argument).with_message(message)
}

/// Stateful evaluator for one scan. Page counters live here, so use a fresh
/// matcher per scanner.
#[derive(Debug)]
pub struct RowMatcher {
    root: Node,
}

#[derive(Debug)]
enum Node {
    Leaf(Filter),
    Page { limit: u64, seen: u64 },
    List { operator: ListOperator, children: Vec<Node> },
}

impl RowMatcher {
    pub fn new(filter: &Filter) -> Self {
        Self {
            root: Node::compile(filter),
        }
    }

    /// Returns the row as the scan should emit it, or `None` to skip it.
    pub fn apply(&mut self, row: Row) -> Option<Row> {
        self.root.apply(row)
    }
}

impl Node {
    fn compile(filter: &Filter) -> Self {
        match filter {
            Filter::Page(limit) => Node::Page {
                limit: *limit,
                seen: 0,
            },
            Filter::List { operator, filters } => Node::List {
                operator: *operator,
                children: filters.iter().map(Node::compile).collect(),
            },
            other => Node::Leaf(other.clone()),
        }
    }

    fn apply(&mut self, mut row: Row) -> Option<Row> {
        match self {
            Node::Page { limit, seen } => {
                if *seen >= *limit {
                    return None;
                }
                *seen += 1;
                Some(row)
            }
            Node::List {
                operator: ListOperator::MustPassAll,
                children,
            } => {
                for child in children.iter_mut() {
                    row = child.apply(row)?;
                }
                Some(row)
            }
            Node::List {
                operator: ListOperator::MustPassOne,
                children,
            } => {
                if children.is_empty() {
                    return Some(row);
                }
                let mut merged: Option<Row> = None;
                for child in children.iter_mut() {
                    let Some(passed) = child.apply(row.clone()) else {
                        continue;
                    };
                    match merged.as_mut() {
                        None => merged = Some(passed),
                        Some(acc) => {
                            for cell in passed.cells {
                                if acc.cell(&cell.family, &cell.qualifier).is_none() {
                                    acc.cells.push(cell);
                                }
                            }
                        }
                    }
                }
                merged.map(|mut row| {
                    row.sort_cells();
                    row
                })
            }
            Node::Leaf(filter) => apply_leaf(filter, row),
        }
    }
}

fn apply_leaf(filter: &Filter, mut row: Row) -> Option<Row> {
    match filter {
        Filter::Prefix(prefix) => row.key.starts_with(prefix).then_some(row),
        Filter::Row { op, comparator } => op.accepts(comparator.compare(&row.key)).then_some(row),
        Filter::Value { op, comparator } => {
            row.cells
                .retain(|cell| op.accepts(comparator.compare(&cell.value)));
            (!row.cells.is_empty()).then_some(row)
        }
        Filter::ColumnPrefix(prefix) => {
            row.cells.retain(|cell| cell.qualifier.starts_with(prefix));
            (!row.cells.is_empty()).then_some(row)
        }
        Filter::SingleColumnValue {
            family,
            qualifier,
            op,
            comparator,
            filter_if_missing,
        } => {
            let pass = match row.cell(family, qualifier) {
                Some(cell) => op.accepts(comparator.compare(&cell.value)),
                None => !*filter_if_missing,
            };
            pass.then_some(row)
        }
        Filter::KeyOnly => {
            for cell in &mut row.cells {
                cell.value.clear();
            }
            Some(row)
        }
        Filter::FirstKeyOnly => {
            row.cells.truncate(1);
            Some(row)
        }
        Filter::Page(_) | Filter::List { .. } => Some(row),
    }
}
