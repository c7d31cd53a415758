// Table, row, and mutation types shared by the facade and every store backend.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::filter::Filter;

pub const DEFAULT_MAX_VERSIONS: u32 = 1;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableName(String);

impl TableName {
    /// Validates `raw` as `[namespace:]qualifier`.
    ///
    /// Blank names are argument errors; malformed names are schema errors.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.trim().is_empty() {
            return Err(Error::new(ErrorKind::Argument).with_message("table name must not be blank"));
        }
        let (namespace, qualifier) = match raw.split_once(':') {
            Some((namespace, qualifier)) => (Some(namespace), qualifier),
            None => (None, raw),
        };
        if let Some(namespace) = namespace {
            if namespace.is_empty()
                || !namespace
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            {
                return Err(invalid_table_name(raw, "namespace must be [A-Za-z0-9_]+"));
            }
        }
        if qualifier.is_empty() {
            return Err(invalid_table_name(raw, "table qualifier must not be empty"));
        }
        if qualifier.starts_with('.') || qualifier.starts_with('-') {
            return Err(invalid_table_name(raw, "table qualifier must not start with '.' or '-'"));
        }
        if !qualifier
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        {
            return Err(invalid_table_name(raw, "table qualifier must be [A-Za-z0-9_.-]+"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn invalid_table_name(raw: &str, reason: &str) -> Error {
    Error::new(ErrorKind::Schema)
        .with_message(format!("invalid table name: {reason}"))
        .with_table(raw)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FamilyDescriptor {
    name: String,
    max_versions: u32,
}

impl FamilyDescriptor {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        validate_family_name(&name)?;
        Ok(Self {
            name,
            max_versions: DEFAULT_MAX_VERSIONS,
        })
    }

    pub fn with_max_versions(mut self, max_versions: u32) -> Self {
        self.max_versions = max_versions.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_versions(&self) -> u32 {
        self.max_versions
    }
}

pub fn validate_family_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::new(ErrorKind::Schema).with_message("column family name must not be blank"));
    }
    if name.contains(':') {
        return Err(Error::new(ErrorKind::Schema)
            .with_message(format!("column family '{name}' must not contain ':'")));
    }
    if name.starts_with('.') {
        return Err(Error::new(ErrorKind::Schema)
            .with_message(format!("column family '{name}' must not start with '.'")));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::new(ErrorKind::Schema)
            .with_message(format!("column family '{name}' must be printable")));
    }
    Ok(())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableDescriptor {
    name: TableName,
    families: Vec<FamilyDescriptor>,
    enabled: bool,
}

impl TableDescriptor {
    /// Builds a descriptor with families in the given order.
    ///
    /// Requires at least one family and rejects duplicates.
    pub fn new(
        name: TableName,
        families: impl IntoIterator<Item = FamilyDescriptor>,
    ) -> Result<Self, Error> {
        let families: Vec<FamilyDescriptor> = families.into_iter().collect();
        if families.is_empty() {
            return Err(Error::new(ErrorKind::Schema)
                .with_message("a table needs at least one column family")
                .with_table(name.as_str()));
        }
        for (idx, family) in families.iter().enumerate() {
            if families[..idx].iter().any(|prev| prev.name == family.name) {
                return Err(Error::new(ErrorKind::Schema)
                    .with_message(format!("duplicate column family '{}'", family.name))
                    .with_table(name.as_str()));
            }
        }
        Ok(Self {
            name,
            families,
            enabled: true,
        })
    }

    pub fn from_family_names<S: AsRef<str>>(name: TableName, families: &[S]) -> Result<Self, Error> {
        let families = families
            .iter()
            .map(|family| FamilyDescriptor::new(family.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| err.with_table(name.as_str()))?;
        Self::new(name, families)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn families(&self) -> &[FamilyDescriptor] {
        &self.families
    }

    pub fn family(&self, name: &str) -> Option<&FamilyDescriptor> {
        self.families.iter().find(|family| family.name == name)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.name)?;
        if !self.enabled {
            write!(f, " (DISABLED)")?;
        }
        for family in &self.families {
            write!(
                f,
                ", {{NAME => '{}', VERSIONS => '{}'}}",
                family.name, family.max_versions
            )?;
        }
        Ok(())
    }
}

/// Write-ahead-log policy applied to a put.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Durability {
    /// Log asynchronously; a crash may lose recent writes.
    Async,
    /// Log synchronously before acknowledging.
    #[default]
    Sync,
    /// Sync the log and force it to disk.
    Fsync,
    /// Do not log.
    Skip,
    /// Whatever the store is configured with (SYNC unless overridden).
    UseDefault,
}

impl Durability {
    pub fn effective(self) -> Durability {
        match self {
            Durability::UseDefault => Durability::Sync,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Durability::Async => "async",
            Durability::Sync => "sync",
            Durability::Fsync => "fsync",
            Durability::Skip => "skip",
            Durability::UseDefault => "default",
        }
    }
}

impl FromStr for Durability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "async" | "async_wal" => Ok(Durability::Async),
            "sync" | "sync_wal" => Ok(Durability::Sync),
            "fsync" | "fsync_wal" => Ok(Durability::Fsync),
            "skip" | "skip_wal" => Ok(Durability::Skip),
            "default" | "use_default" => Ok(Durability::UseDefault),
            _ => Err(Error::new(ErrorKind::Argument)
                .with_message(format!("unknown durability level '{s}'"))
                .with_hint("Use one of: async, sync, fsync, skip, default.")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cell {
    pub row: Vec<u8>,
    pub family: String,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: u64,
}

impl Cell {
    /// `family:qualifier`, the column address used on the wire.
    pub fn column(&self) -> Vec<u8> {
        column_bytes(&self.family, &self.qualifier)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Row {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            cells: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, family: &str, qualifier: &[u8]) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|cell| cell.family == family && cell.qualifier == qualifier)
    }

    pub fn value(&self, family: &str, qualifier: &[u8]) -> Option<&[u8]> {
        self.cell(family, qualifier).map(|cell| cell.value.as_slice())
    }

    pub fn sort_cells(&mut self) {
        self.cells
            .sort_by(|a, b| (&a.family, &a.qualifier).cmp(&(&b.family, &b.qualifier)));
    }
}

/// Column values for one row: family -> ordered (qualifier, value) pairs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Columns {
    families: BTreeMap<String, Vec<(Vec<u8>, Vec<u8>)>>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.insert(family, qualifier, value);
        self
    }

    /// Adds a value; a repeated (family, qualifier) replaces the earlier value.
    pub fn insert(
        &mut self,
        family: impl Into<String>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) {
        let qualifier = qualifier.into();
        let value = value.into();
        let entries = self.families.entry(family.into()).or_default();
        match entries.iter_mut().find(|(existing, _)| *existing == qualifier) {
            Some(entry) => entry.1 = value,
            None => entries.push((qualifier, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.families.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8], &[u8])> {
        self.families.iter().flat_map(|(family, entries)| {
            entries
                .iter()
                .map(move |(qualifier, value)| (family.as_str(), qualifier.as_slice(), value.as_slice()))
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Put {
    pub key: Vec<u8>,
    pub columns: Columns,
    pub durability: Durability,
}

impl Put {
    pub fn new(key: impl Into<Vec<u8>>, columns: Columns) -> Self {
        Self {
            key: key.into(),
            columns,
            durability: Durability::Sync,
        }
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

/// Column restriction for gets and scans.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ColumnSelector {
    #[default]
    All,
    Family(String),
    Column { family: String, qualifier: Vec<u8> },
}

impl ColumnSelector {
    /// Empty strings count as absent; a qualifier without a family is ignored.
    pub fn from_parts(family: Option<&str>, qualifier: Option<&[u8]>) -> Self {
        let family = family.filter(|family| !family.is_empty());
        let qualifier = qualifier.filter(|qualifier| !qualifier.is_empty());
        match (family, qualifier) {
            (Some(family), Some(qualifier)) => ColumnSelector::Column {
                family: family.to_string(),
                qualifier: qualifier.to_vec(),
            },
            (Some(family), None) => ColumnSelector::Family(family.to_string()),
            (None, Some(qualifier)) => {
                tracing::debug!(
                    qualifier = %qualifier.as_bstr(),
                    "qualifier given without a family; selecting all columns"
                );
                ColumnSelector::All
            }
            (None, None) => ColumnSelector::All,
        }
    }

    pub fn matches(&self, family: &str, qualifier: &[u8]) -> bool {
        match self {
            ColumnSelector::All => true,
            ColumnSelector::Family(wanted) => wanted == family,
            ColumnSelector::Column {
                family: wanted_family,
                qualifier: wanted_qualifier,
            } => wanted_family == family && wanted_qualifier.as_slice() == qualifier,
        }
    }

    pub fn family(&self) -> Option<&str> {
        match self {
            ColumnSelector::All => None,
            ColumnSelector::Family(family) | ColumnSelector::Column { family, .. } => Some(family),
        }
    }

    /// Wire form: `family` or `family:qualifier`; `None` for all columns.
    pub fn to_column_bytes(&self) -> Option<Vec<u8>> {
        match self {
            ColumnSelector::All => None,
            ColumnSelector::Family(family) => Some(family.as_bytes().to_vec()),
            ColumnSelector::Column { family, qualifier } => Some(column_bytes(family, qualifier)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanSpec {
    pub columns: ColumnSelector,
    pub start: Option<Vec<u8>>,
    pub stop: Option<Vec<u8>>,
    pub filter: Option<Filter>,
}

impl ScanSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(mut self, columns: ColumnSelector) -> Self {
        self.columns = columns;
        self
    }

    /// Inclusive lower bound; an empty key means unbounded.
    pub fn with_start(mut self, start: impl Into<Vec<u8>>) -> Self {
        let start = start.into();
        self.start = (!start.is_empty()).then_some(start);
        self
    }

    /// Exclusive upper bound; an empty key means unbounded.
    pub fn with_stop(mut self, stop: impl Into<Vec<u8>>) -> Self {
        let stop = stop.into();
        self.stop = (!stop.is_empty()).then_some(stop);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if key < start.as_slice() {
                return false;
            }
        }
        if let Some(stop) = &self.stop {
            if key >= stop.as_slice() {
                return false;
            }
        }
        true
    }
}

pub fn column_bytes(family: &str, qualifier: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(family.len() + 1 + qualifier.len());
    out.extend_from_slice(family.as_bytes());
    out.push(b':');
    out.extend_from_slice(qualifier);
    out
}

/// Splits a `family:qualifier` column address. A bare family yields an empty qualifier.
pub fn split_column(column: &[u8]) -> Result<(String, Vec<u8>), Error> {
    let (family, qualifier) = match column.find_byte(b':') {
        Some(idx) => (&column[..idx], column[idx + 1..].to_vec()),
        None => (column, Vec::new()),
    };
    let family = std::str::from_utf8(family).map_err(|err| {
        Error::new(ErrorKind::Schema)
            .with_message("column family is not valid utf-8")
            .with_source(err)
    })?;
    validate_family_name(family)?;
    Ok((family.to_string(), qualifier))
}

#[cfg(test)]
mod tests {
    use super::{
        ColumnSelector, Columns, Durability, ErrorKind, ScanSpec, TableDescriptor, TableName,
        split_column,
    };

    #[test]
    fn table_name_accepts_namespaced_names() {
        let name = TableName::parse("ns_1:orders.v2-a").expect("name");
        assert_eq!(name.as_str(), "ns_1:orders.v2-a");
    }

    #[test]
    fn blank_table_name_is_argument_error() {
        let err = TableName::parse("  ").expect_err("blank");
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn malformed_table_names_are_schema_errors() {
        for raw in ["bad name", ".hidden", "-dash", "a:b:c", ":t", "ns:", "t/1"] {
            let err = TableName::parse(raw).expect_err(raw);
            assert_eq!(err.kind(), ErrorKind::Schema, "{raw}");
        }
    }

    #[test]
    fn descriptor_rejects_bad_families() {
        let name = TableName::parse("t1").expect("name");
        let err = TableDescriptor::from_family_names(name.clone(), &["cf:1"]).expect_err("colon");
        assert_eq!(err.kind(), ErrorKind::Schema);
        let err = TableDescriptor::from_family_names(name.clone(), &["cf", "cf"]).expect_err("dup");
        assert_eq!(err.kind(), ErrorKind::Schema);
        let none: [&str; 0] = [];
        let err = TableDescriptor::from_family_names(name, &none).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn descriptor_display_lists_families() {
        let name = TableName::parse("t1").expect("name");
        let descriptor = TableDescriptor::from_family_names(name, &["cf1", "cf2"]).expect("desc");
        assert_eq!(
            descriptor.to_string(),
            "'t1', {NAME => 'cf1', VERSIONS => '1'}, {NAME => 'cf2', VERSIONS => '1'}"
        );
    }

    #[test]
    fn columns_replace_repeated_qualifier() {
        let columns = Columns::new()
            .with("cf1", "a", "1")
            .with("cf2", "b", "2")
            .with("cf1", "a", "3");
        let flat: Vec<_> = columns.iter().collect();
        assert_eq!(
            flat,
            vec![
                ("cf1", b"a".as_slice(), b"3".as_slice()),
                ("cf2", b"b".as_slice(), b"2".as_slice()),
            ]
        );
        assert_eq!(columns.len(), 2);
    }

    #[test]
    fn selector_ignores_blank_parts() {
        assert_eq!(ColumnSelector::from_parts(Some(""), Some(b"q")), ColumnSelector::All);
        assert_eq!(
            ColumnSelector::from_parts(Some("cf"), Some(b"")),
            ColumnSelector::Family("cf".to_string())
        );
        let column = ColumnSelector::from_parts(Some("cf"), Some(b"q"));
        assert!(column.matches("cf", b"q"));
        assert!(!column.matches("cf", b"r"));
        assert_eq!(column.to_column_bytes(), Some(b"cf:q".to_vec()));
    }

    #[test]
    fn scan_bounds_are_half_open() {
        let spec = ScanSpec::new().with_start("b").with_stop("d");
        assert!(!spec.contains_key(b"a"));
        assert!(spec.contains_key(b"b"));
        assert!(spec.contains_key(b"c"));
        assert!(!spec.contains_key(b"d"));
        let open = ScanSpec::new().with_start("").with_stop("");
        assert!(open.contains_key(b"anything"));
    }

    #[test]
    fn durability_default_is_sync() {
        assert_eq!(Durability::UseDefault.effective(), Durability::Sync);
        assert_eq!("FSYNC_WAL".parse::<Durability>().expect("parse"), Durability::Fsync);
        let err = "eventually".parse::<Durability>().expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn split_column_handles_bare_family() {
        assert_eq!(split_column(b"cf").expect("bare"), ("cf".to_string(), Vec::new()));
        assert_eq!(
            split_column(b"cf:a:b").expect("nested"),
            ("cf".to_string(), b"a:b".to_vec())
        );
    }
}
