use crate::core::{Dataset, EngineError, Result, RowId, SortSpec};
use std::cmp::Ordering;

/// Service for ordering a set of visible rows
pub struct SortService;

impl SortService {
    /// Order `candidates` by `spec`.
    ///
    /// The sort is stable: rows with equal keys keep their relative order from
    /// `candidates`, which callers pass in the previous view order. Ids no longer in
    /// the dataset are dropped.
    pub fn order(dataset: &Dataset, candidates: &[RowId], spec: &SortSpec, delimiter: &str) -> Result<Vec<RowId>> {
        let present = candidates.iter().copied().filter(|id| dataset.contains_row(*id));
        let ascending = spec.ascending();
        let directed = |ord: Ordering| if ascending { ord } else { ord.reverse() };

        let ordered = match spec {
            SortSpec::RowId { .. } => {
                let mut ids: Vec<RowId> = present.collect();
                ids.sort_by(|a, b| directed(a.cmp(b)));
                ids
            }
            SortSpec::Column { column, .. } => {
                if dataset.column(*column).is_none() {
                    return Err(EngineError::invalid_reference(format!("sort column {column}")));
                }
                let mut keyed: Vec<(RowId, &str)> = present
                    .filter_map(|id| dataset.row(id).map(|row| (id, row.get(*column))))
                    .collect();
                keyed.sort_by(|a, b| directed(compare_numeric_prefix(a.1, b.1)));
                keyed.into_iter().map(|(id, _)| id).collect()
            }
            SortSpec::WholeRow { .. } => {
                let mut keyed: Vec<(RowId, String)> = present
                    .filter_map(|id| whole_row_key(dataset, id, delimiter).map(|key| (id, key)))
                    .collect();
                keyed.sort_by(|a, b| directed(a.1.cmp(&b.1)));
                keyed.into_iter().map(|(id, _)| id).collect()
            }
        };
        Ok(ordered)
    }
}

/// The whole-row key: every cell in column display order joined by `delimiter`
pub fn whole_row_key(dataset: &Dataset, row: RowId, delimiter: &str) -> Option<String> {
    dataset
        .row_values(row)
        .map(|values| values.join(delimiter))
}

/// Leading integer of a value (after optional whitespace), without leading zeros
fn numeric_prefix(value: &str) -> Option<&str> {
    let value = value.trim_start();
    let end = value
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    if end == 0 {
        return None;
    }
    let digits = value[..end].trim_start_matches('0');
    Some(if digits.is_empty() { "0" } else { digits })
}

/// Order values with a leading integer numerically, ahead of values without one.
/// Ties fall back to plain string comparison.
pub fn compare_numeric_prefix(a: &str, b: &str) -> Ordering {
    match (numeric_prefix(a), numeric_prefix(b)) {
        (Some(x), Some(y)) => x
            .len()
            .cmp(&y.len())
            .then_with(|| x.cmp(y))
            .then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
