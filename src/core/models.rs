use crate::core::types::{ColumnId, DEFAULT_DELIMITER, RowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strum::{Display, EnumString};

/// Column definition shared by every row of a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub display_name: String,
    pub visible: bool,
    pub position: usize,
}

/// String test applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FilterMode {
    Contains,
    NotContains,
    Equals,
    StartsWith,
    EndsWith,
    Regex,
}

/// Target of a filter: one column, or every column of the row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterColumn {
    All,
    Column(ColumnId),
}

impl fmt::Display for FilterColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Column(id) => write!(f, "{id}"),
        }
    }
}

/// A single filter predicate. Multiple specs combine with AND.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub column: FilterColumn,
    pub mode: FilterMode,
    pub value: String,
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
}

fn default_case_insensitive() -> bool {
    true
}

impl FilterSpec {
    /// Case-insensitive filter on a single column
    pub fn new(column: ColumnId, mode: FilterMode, value: impl Into<String>) -> Self {
        Self {
            column: FilterColumn::Column(column),
            mode,
            value: value.into(),
            case_insensitive: true,
        }
    }

    /// Case-insensitive "contains" across every column
    pub fn global(value: impl Into<String>) -> Self {
        Self {
            column: FilterColumn::All,
            mode: FilterMode::Contains,
            value: value.into(),
            case_insensitive: true,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_insensitive = false;
        self
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} {:?}{}",
            self.column,
            self.mode,
            self.value,
            if self.case_insensitive { "" } else { " (case)" }
        )
    }
}

/// Named, persisted list of filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterTemplate {
    pub name: String,
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub global: String,
}

/// Ordering requested for the current view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SortSpec {
    Column { column: ColumnId, ascending: bool },
    WholeRow { ascending: bool },
    RowId { ascending: bool },
}

impl SortSpec {
    pub fn ascending(&self) -> bool {
        match self {
            Self::Column { ascending, .. }
            | Self::WholeRow { ascending }
            | Self::RowId { ascending } => *ascending,
        }
    }
}

/// Subset of the dataset a batch operation is restricted to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    Cells(BTreeSet<(RowId, ColumnId)>),
    Rows(BTreeSet<RowId>),
    #[default]
    Table,
}

impl Scope {
    pub fn contains_row(&self, row: RowId) -> bool {
        match self {
            Self::Cells(cells) => cells.iter().any(|(r, _)| *r == row),
            Self::Rows(rows) => rows.contains(&row),
            Self::Table => true,
        }
    }

    pub fn contains_cell(&self, row: RowId, column: ColumnId) -> bool {
        match self {
            Self::Cells(cells) => cells.contains(&(row, column)),
            Self::Rows(rows) => rows.contains(&row),
            Self::Table => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
pub enum ExportKind {
    #[strum(serialize = "TXT")]
    Txt,
    #[strum(serialize = "CSV")]
    Csv,
    #[strum(serialize = "XLSX")]
    Xlsx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    #[default]
    View,
    SelectedRows,
}

/// Persisted export configuration consumed by the exporter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTemplate {
    pub name: String,
    pub export_kind: ExportKind,
    pub column_order: Vec<ColumnId>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub scope: ExportScope,
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}
