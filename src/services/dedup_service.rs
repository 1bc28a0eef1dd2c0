use crate::core::{ColumnId, Dataset, EngineError, Result, RowId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use strum::{Display, EnumString};

/// Which row of a duplicate group survives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum KeepPolicy {
    #[default]
    First,
    Last,
}

/// Rows to keep and remove, both in dataset order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupPlan {
    pub kept: Vec<RowId>,
    pub removed: Vec<RowId>,
}

impl DedupPlan {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Counts shown before a dedup is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPreview {
    pub total_rows: usize,
    pub removed_count: usize,
    pub kept_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub key_values: Vec<String>,
    pub count: usize,
}

/// Read-only grouping summary, in first-seen key order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub key_columns: Vec<String>,
    pub entries: Vec<GroupEntry>,
}

impl GroupReport {
    /// Header row (key names then "Count") for export
    pub fn header(&self) -> Vec<String> {
        let mut header = self.key_columns.clone();
        header.push("Count".to_string());
        header
    }

    /// One record per group: key values then count
    pub fn to_records(&self) -> Vec<Vec<String>> {
        self.entries
            .iter()
            .map(|e| {
                let mut record = e.key_values.clone();
                record.push(e.count.to_string());
                record
            })
            .collect()
    }
}

/// Service for duplicate detection and grouping
pub struct DedupService;

impl DedupService {
    fn check_keys(dataset: &Dataset, key_columns: &[ColumnId]) -> Result<()> {
        if key_columns.is_empty() {
            return Err(EngineError::invalid_operation("no key columns selected"));
        }
        if let Some(missing) = key_columns.iter().find(|c| dataset.column(**c).is_none()) {
            return Err(EngineError::invalid_reference(format!("column {missing}")));
        }
        Ok(())
    }

    fn key(dataset: &Dataset, row: RowId, key_columns: &[ColumnId]) -> Vec<String> {
        dataset.project(row, key_columns).unwrap_or_default()
    }

    /// Decide which rows survive. Keys compare exactly (case and order sensitive).
    pub fn plan(dataset: &Dataset, key_columns: &[ColumnId], keep: KeepPolicy) -> Result<DedupPlan> {
        Self::check_keys(dataset, key_columns)?;

        let ids = dataset.row_ids();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut survivors: HashSet<RowId> = HashSet::new();
        let mut visit = |id: RowId| {
            if seen.insert(Self::key(dataset, id, key_columns)) {
                survivors.insert(id);
            }
        };
        match keep {
            KeepPolicy::First => ids.iter().copied().for_each(&mut visit),
            KeepPolicy::Last => ids.iter().rev().copied().for_each(&mut visit),
        }

        let (kept, removed): (Vec<RowId>, Vec<RowId>) = ids.into_iter().partition(|id| survivors.contains(id));
        Ok(DedupPlan { kept, removed })
    }

    /// Counts only; never touches the dataset
    pub fn preview(dataset: &Dataset, key_columns: &[ColumnId], keep: KeepPolicy) -> Result<DedupPreview> {
        let plan = Self::plan(dataset, key_columns, keep)?;
        Ok(DedupPreview {
            total_rows: dataset.row_count(),
            removed_count: plan.removed.len(),
            kept_count: plan.kept.len(),
        })
    }

    pub fn group(dataset: &Dataset, key_columns: &[ColumnId]) -> Result<GroupReport> {
        Self::group_rows(dataset, &dataset.row_ids(), key_columns)
    }

    /// Group the given rows (e.g. the current view) by key, counting each distinct key
    pub fn group_rows(dataset: &Dataset, rows: &[RowId], key_columns: &[ColumnId]) -> Result<GroupReport> {
        Self::check_keys(dataset, key_columns)?;

        let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
        let mut entries: Vec<GroupEntry> = Vec::new();
        for &id in rows.iter().filter(|id| dataset.contains_row(**id)) {
            let key = Self::key(dataset, id, key_columns);
            match slots.get(&key) {
                Some(&slot) => entries[slot].count += 1,
                None => {
                    slots.insert(key.clone(), entries.len());
                    entries.push(GroupEntry {
                        key_values: key,
                        count: 1,
                    });
                }
            }
        }

        let key_columns = key_columns
            .iter()
            .filter_map(|c| dataset.column(*c).map(|col| col.display_name.clone()))
            .collect();
        Ok(GroupReport { key_columns, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dataset() -> Dataset {
        Dataset::parse("a----1\nb----2\na----3", "----")
    }

    #[test]
    fn test_dedup_keep_first() {
        let ds = dataset();
        let ids = ds.row_ids();
        let plan = DedupService::plan(&ds, &[ds.column_ids()[0]], KeepPolicy::First).unwrap();
        assert_eq!(plan.kept, vec![ids[0], ids[1]]);
        assert_eq!(plan.removed, vec![ids[2]]);
        assert_eq!(plan.removed_count(), 1);
    }

    #[test]
    fn test_dedup_keep_last() {
        let ds = dataset();
        let ids = ds.row_ids();
        let plan = DedupService::plan(&ds, &[ds.column_ids()[0]], KeepPolicy::Last).unwrap();
        assert_eq!(plan.kept, vec![ids[1], ids[2]]);
        assert_eq!(plan.removed, vec![ids[0]]);
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let ds = dataset();
        let preview = DedupService::preview(&ds, &ds.column_ids(), KeepPolicy::First).unwrap();
        assert_eq!(
            preview,
            DedupPreview {
                total_rows: 3,
                removed_count: 0,
                kept_count: 3
            }
        );
        assert_eq!(ds.row_count(), 3);
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let ds = Dataset::parse("A\na", "----");
        let plan = DedupService::plan(&ds, &ds.column_ids(), KeepPolicy::First).unwrap();
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn test_group_in_first_seen_order() {
        let ds = dataset();
        let report = DedupService::group(&ds, &[ds.column_ids()[0]]).unwrap();
        assert_eq!(
            report.entries,
            vec![
                GroupEntry {
                    key_values: vec!["a".into()],
                    count: 2
                },
                GroupEntry {
                    key_values: vec!["b".into()],
                    count: 1
                },
            ]
        );
        assert_eq!(report.header(), vec!["Column 1", "Count"]);
        assert_eq!(report.to_records()[0], vec!["a", "2"]);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let ds = dataset();
        assert!(matches!(
            DedupService::plan(&ds, &[], KeepPolicy::First),
            Err(EngineError::InvalidOperation(_))
        ));
        assert!(DedupService::group(&ds, &[ColumnId::from(7)]).is_err());
    }
}
