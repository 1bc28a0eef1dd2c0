//! Batch text transforms over a scope of cells, rows or the whole table.
//!
//! Every operation runs against a clone of the dataset. The caller receives the new
//! dataset only when the whole operation succeeded, so a failure leaves the original
//! untouched.

use crate::core::{ColumnId, Dataset, EngineError, Result, RowId, Scope};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use strum::{Display, EnumString};
use tracing::{debug, info};

/// Header given to the column produced by a merge
pub const MERGED_COLUMN_NAME: &str = "Merged";

/// Per-cell normalisations and empty-row/column removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CleanAction {
    Trim,
    StripAll,
    Upper,
    Lower,
    ToHalfWidth,
    ToFullWidth,
    RemoveEmptyRows,
    RemoveEmptyColumns,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Replace every occurrence; with `use_regex` the replacement may use `$1`-style groups
    Replace {
        find: String,
        replace: String,
        use_regex: bool,
    },
    Affix {
        prefix: String,
        suffix: String,
    },
    Split {
        delimiter: String,
        keep_original: bool,
    },
    /// Merge ignores `target_columns` and uses its own ordered column list
    Merge {
        columns: Vec<ColumnId>,
        delimiter: String,
        keep_originals: bool,
    },
    Clean {
        action: CleanAction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub scope: Scope,
    pub target_columns: Vec<ColumnId>,
    pub operation: Operation,
}

/// What a committed batch operation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub cells_changed: usize,
    pub columns_added: Vec<ColumnId>,
    pub columns_removed: Vec<ColumnId>,
    pub rows_removed: usize,
}

/// Service for batch transforms
pub struct BatchService;

impl BatchService {
    /// Apply `request` to a copy of `dataset` and return the copy.
    pub fn apply(dataset: &Dataset, request: &BatchRequest) -> Result<(Dataset, BatchOutcome)> {
        Self::validate(dataset, request)?;

        let mut next = dataset.clone();
        let scope = &request.scope;
        let targets = &request.target_columns;

        let outcome = match &request.operation {
            Operation::Replace {
                find,
                replace,
                use_regex: true,
            } => {
                let re = Regex::new(find)
                    .map_err(|e| EngineError::invalid_operation(format!("bad pattern {find:?}: {e}")))?;
                Self::map_cells(&mut next, scope, targets, |v| {
                    re.replace_all(v, replace.as_str()).into_owned()
                })?
            }
            Operation::Replace { find, replace, .. } => {
                Self::map_cells(&mut next, scope, targets, |v| v.replace(find.as_str(), replace))?
            }
            Operation::Affix { prefix, suffix } => {
                Self::map_cells(&mut next, scope, targets, |v| format!("{prefix}{v}{suffix}"))?
            }
            Operation::Split {
                delimiter,
                keep_original,
            } => Self::split(&mut next, scope, targets, delimiter, *keep_original)?,
            Operation::Merge {
                columns,
                delimiter,
                keep_originals,
            } => Self::merge(&mut next, scope, columns, delimiter, *keep_originals)?,
            Operation::Clean { action } => Self::clean(&mut next, scope, targets, *action)?,
        };

        info!(
            "Batch {:?} applied: {} cells changed, +{} / -{} columns, -{} rows",
            request.operation,
            outcome.cells_changed,
            outcome.columns_added.len(),
            outcome.columns_removed.len(),
            outcome.rows_removed
        );
        Ok((next, outcome))
    }

    fn validate(dataset: &Dataset, request: &BatchRequest) -> Result<()> {
        let columns: &[ColumnId] = match &request.operation {
            Operation::Merge { columns, .. } => {
                if columns.len() < 2 {
                    return Err(EngineError::invalid_operation("merge needs at least two columns"));
                }
                columns
            }
            _ => &request.target_columns,
        };
        if columns.is_empty() {
            return Err(EngineError::invalid_operation("no target columns"));
        }
        if let Some(missing) = columns.iter().find(|c| dataset.column(**c).is_none()) {
            return Err(EngineError::invalid_reference(format!("column {missing}")));
        }

        let missing_row = match &request.scope {
            Scope::Rows(rows) => rows.iter().find(|r| !dataset.contains_row(**r)).copied(),
            Scope::Cells(cells) => cells
                .iter()
                .find(|(r, _)| !dataset.contains_row(*r))
                .map(|(r, _)| *r),
            Scope::Table => None,
        };
        if let Some(row) = missing_row {
            return Err(EngineError::invalid_reference(format!("row {row}")));
        }

        match &request.operation {
            Operation::Replace {
                find,
                use_regex: false,
                ..
            } if find.is_empty() => Err(EngineError::invalid_operation("find text is empty")),
            Operation::Split { delimiter, .. } if delimiter.is_empty() => {
                Err(EngineError::invalid_operation("split delimiter is empty"))
            }
            _ => Ok(()),
        }
    }

    /// Rewrite each in-scope cell of the target columns. Counts cells whose value changed.
    fn map_cells<F>(dataset: &mut Dataset, scope: &Scope, targets: &[ColumnId], f: F) -> Result<BatchOutcome>
    where
        F: Fn(&str) -> String,
    {
        let mut changes: Vec<(RowId, ColumnId, String)> = Vec::new();
        for row in dataset.rows() {
            for &column in targets {
                if !scope.contains_cell(row.id(), column) {
                    continue;
                }
                let old = row.get(column);
                let new = f(old);
                if new != old {
                    changes.push((row.id(), column, new));
                }
            }
        }

        let cells_changed = changes.len();
        for (row, column, value) in changes {
            dataset.edit_cell(row, column, value)?;
        }
        Ok(BatchOutcome {
            cells_changed,
            ..Default::default()
        })
    }

    /// Split each target column on its own. New columns go immediately right of the
    /// source; a column whose values never split into more than one part is skipped.
    fn split(
        dataset: &mut Dataset,
        scope: &Scope,
        targets: &[ColumnId],
        delimiter: &str,
        keep_original: bool,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for &source in targets {
            let name = dataset
                .column(source)
                .map(|c| c.display_name.clone())
                .ok_or_else(|| EngineError::invalid_reference(format!("column {source}")))?;

            let parts: HashMap<RowId, Vec<String>> = dataset
                .rows()
                .iter()
                .filter(|row| scope.contains_cell(row.id(), source))
                .map(|row| {
                    let pieces = row.get(source).split(delimiter).map(str::to_string).collect();
                    (row.id(), pieces)
                })
                .collect();
            let max_parts = parts.values().map(Vec::len).max().unwrap_or(0);
            if max_parts <= 1 {
                debug!("Column {} has nothing to split on {:?}", name, delimiter);
                continue;
            }

            let base = dataset
                .column_position(source)
                .map(|p| p + 1)
                .unwrap_or(dataset.column_count());
            for i in 0..max_parts {
                let values: HashMap<RowId, String> = dataset
                    .rows()
                    .iter()
                    .map(|row| {
                        let value = match parts.get(&row.id()) {
                            Some(pieces) => pieces.get(i).cloned().unwrap_or_default(),
                            // out of scope rows keep their value when the source goes away
                            None if i == 0 && !keep_original => row.get(source).to_string(),
                            None => String::new(),
                        };
                        (row.id(), value)
                    })
                    .collect();
                let id = dataset.insert_column(base + i, format!("{name} part {}", i + 1), &values);
                outcome.columns_added.push(id);
            }
            outcome.cells_changed += parts.len();

            if !keep_original {
                dataset.remove_columns(&[source])?;
                outcome.columns_removed.push(source);
            }
        }
        Ok(outcome)
    }

    /// Join `columns` (in the given order) into one column placed after the rightmost of them
    fn merge(
        dataset: &mut Dataset,
        scope: &Scope,
        columns: &[ColumnId],
        delimiter: &str,
        keep_originals: bool,
    ) -> Result<BatchOutcome> {
        let insert_at = columns
            .iter()
            .filter_map(|c| dataset.column_position(*c))
            .max()
            .map(|p| p + 1)
            .unwrap_or(dataset.column_count());

        let mut in_scope = 0;
        let values: HashMap<RowId, String> = dataset
            .rows()
            .iter()
            .map(|row| {
                let joined = columns
                    .iter()
                    .map(|&c| row.get(c))
                    .collect::<Vec<_>>()
                    .join(delimiter);
                let value = if scope.contains_row(row.id()) {
                    in_scope += 1;
                    joined
                } else if keep_originals {
                    String::new()
                } else {
                    joined
                };
                (row.id(), value)
            })
            .collect();

        let merged = dataset.insert_column(insert_at, MERGED_COLUMN_NAME, &values);
        let mut outcome = BatchOutcome {
            cells_changed: in_scope,
            columns_added: vec![merged],
            ..Default::default()
        };

        if !keep_originals {
            let mut seen = HashSet::new();
            let sources: Vec<ColumnId> = columns.iter().copied().filter(|c| seen.insert(*c)).collect();
            dataset.remove_columns(&sources)?;
            outcome.columns_removed = sources;
        }
        Ok(outcome)
    }

    fn clean(dataset: &mut Dataset, scope: &Scope, targets: &[ColumnId], action: CleanAction) -> Result<BatchOutcome> {
        match action {
            CleanAction::Trim => Self::map_cells(dataset, scope, targets, |v| v.trim().to_string()),
            CleanAction::StripAll => Self::map_cells(dataset, scope, targets, |v| {
                v.chars().filter(|c| !c.is_whitespace()).collect()
            }),
            CleanAction::Upper => Self::map_cells(dataset, scope, targets, str::to_uppercase),
            CleanAction::Lower => Self::map_cells(dataset, scope, targets, str::to_lowercase),
            CleanAction::ToHalfWidth => Self::map_cells(dataset, scope, targets, to_half_width),
            CleanAction::ToFullWidth => Self::map_cells(dataset, scope, targets, to_full_width),
            CleanAction::RemoveEmptyRows => {
                let empty: Vec<RowId> = dataset
                    .rows()
                    .iter()
                    .filter(|row| scope.contains_row(row.id()))
                    .filter(|row| targets.iter().all(|&c| row.get(c).trim().is_empty()))
                    .map(|row| row.id())
                    .collect();
                let rows_removed = dataset.delete_rows(empty);
                Ok(BatchOutcome {
                    rows_removed,
                    ..Default::default()
                })
            }
            CleanAction::RemoveEmptyColumns => {
                let empty: Vec<ColumnId> = targets
                    .iter()
                    .copied()
                    .filter(|&c| dataset.rows().iter().all(|row| row.get(c).trim().is_empty()))
                    .collect();
                dataset.remove_columns(&empty)?;
                Ok(BatchOutcome {
                    columns_removed: empty,
                    ..Default::default()
                })
            }
        }
    }
}

/// Full-width forms (U+FF01..U+FF5E) and the ideographic space to their ASCII counterparts
pub fn to_half_width(text: &str) -> String {
    text.chars()
        .map(|c| match c as u32 {
            0x3000 => ' ',
            code @ 0xFF01..=0xFF5E => char::from_u32(code - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Printable ASCII and space to their full-width forms
pub fn to_full_width(text: &str) -> String {
    text.chars()
        .map(|c| match c as u32 {
            0x20 => '\u{3000}',
            code @ 0x21..=0x7E => char::from_u32(code + 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}
