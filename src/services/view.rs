use crate::core::{ColumnId, EngineError, Result, RowId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// The current view: visible rows in display order, addressable both ways.
///
/// Holds ids only. Selections made against positions are resolved to [`RowId`]s here
/// before anything mutates the dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewIndex {
    order: Vec<RowId>,
    positions: HashMap<RowId, usize>,
}

impl ViewIndex {
    pub fn new(order: Vec<RowId>) -> Self {
        let positions = order.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();
        Self { order, positions }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn row_ids(&self) -> &[RowId] {
        &self.order
    }

    pub fn position_to_row_id(&self, pos: usize) -> Option<RowId> {
        self.order.get(pos).copied()
    }

    pub fn row_id_to_position(&self, id: RowId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Resolve selected positions to row ids, in view order, without duplicates.
    /// Any out-of-range position rejects the whole selection.
    pub fn resolve_selection(&self, positions: &[usize]) -> Result<Vec<RowId>> {
        let mut unique = BTreeSet::new();
        for &pos in positions {
            if pos >= self.order.len() {
                return Err(EngineError::invalid_reference(format!(
                    "view position {pos} (view has {} rows)",
                    self.order.len()
                )));
            }
            unique.insert(pos);
        }
        Ok(unique.into_iter().map(|pos| self.order[pos]).collect())
    }

    /// Resolve `(position, column)` selections into a cell scope
    pub fn resolve_cells(&self, cells: &[(usize, ColumnId)]) -> Result<BTreeSet<(RowId, ColumnId)>> {
        cells
            .iter()
            .map(|&(pos, column)| {
                self.position_to_row_id(pos)
                    .map(|id| (id, column))
                    .ok_or_else(|| EngineError::invalid_reference(format!("view position {pos}")))
            })
            .collect()
    }

    /// Every view position not in `positions`
    pub fn invert_selection(&self, positions: &[usize]) -> Vec<usize> {
        let selected: HashSet<usize> = positions.iter().copied().collect();
        (0..self.order.len()).filter(|pos| !selected.contains(pos)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(raw: &[u64]) -> Vec<RowId> {
        raw.iter().map(|&n| RowId::from(n)).collect()
    }

    #[test]
    fn test_bidirectional_mapping() {
        let view = ViewIndex::new(ids(&[5, 2, 9]));
        assert_eq!(view.position_to_row_id(1), Some(RowId::from(2)));
        assert_eq!(view.row_id_to_position(RowId::from(9)), Some(2));
        assert_eq!(view.row_id_to_position(RowId::from(1)), None);
        assert_eq!(view.position_to_row_id(3), None);
    }

    #[test]
    fn test_resolve_selection_orders_and_dedups() {
        let view = ViewIndex::new(ids(&[5, 2, 9]));
        assert_eq!(view.resolve_selection(&[2, 0, 2]).unwrap(), ids(&[5, 9]));
        assert!(view.resolve_selection(&[0, 3]).is_err());
    }

    #[test]
    fn test_resolve_cells() {
        let view = ViewIndex::new(ids(&[5, 2]));
        let col = ColumnId::from(1);
        let cells = view.resolve_cells(&[(1, col)]).unwrap();
        assert!(cells.contains(&(RowId::from(2), col)));
        assert!(view.resolve_cells(&[(2, col)]).is_err());
    }

    #[test]
    fn test_invert_selection() {
        let view = ViewIndex::new(ids(&[1, 2, 3, 4]));
        assert_eq!(view.invert_selection(&[0, 2]), vec![1, 3]);
        assert_eq!(view.invert_selection(&[]), vec![0, 1, 2, 3]);
    }
}
