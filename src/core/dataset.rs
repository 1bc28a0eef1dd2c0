use crate::core::error::{EngineError, Result};
use crate::core::models::Column;
use crate::core::parser;
use crate::core::types::{ColumnId, RowId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One record. Holds a value for every column currently defined on its dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    id: RowId,
    cells: HashMap<ColumnId, String>,
}

impl Row {
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Cell value, empty for a column the row has never been given
    pub fn get(&self, column: ColumnId) -> &str {
        self.cells.get(&column).map(String::as_str).unwrap_or("")
    }

    pub fn cells(&self) -> &HashMap<ColumnId, String> {
        &self.cells
    }
}

/// Rows and the column schema they share.
///
/// Rows live in an arena indexed by [`RowId`]. Row and column ids come from monotonic
/// counters that are never rewound, so an id refers to the same row or column for the
/// whole session even after deletion, undo or a script rebuild.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Row>,
    index: HashMap<RowId, usize>,
    next_row_id: u64,
    next_column_id: u64,
}

impl Default for Dataset {
    fn default() -> Self {
        Self::new()
    }
}

impl Dataset {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            index: HashMap::new(),
            next_row_id: 1,
            next_column_id: 1,
        }
    }

    /// Build a dataset from delimiter-separated text
    pub fn parse(text: &str, delimiter: &str) -> Self {
        let mut dataset = Self::new();
        dataset.append_text(text, delimiter);
        dataset
    }

    /// Append every non-blank line of `text`. Returns the number of rows added.
    pub fn append_text(&mut self, text: &str, delimiter: &str) -> usize {
        let before_columns = self.columns.len();
        let mut added = 0;
        for record in parser::parse_text(text, delimiter) {
            self.append_record(record);
            added += 1;
        }
        debug!(
            "Parsed {} rows, columns {} -> {}",
            added,
            before_columns,
            self.columns.len()
        );
        added
    }

    /// Append one record in column display order.
    ///
    /// A short record is padded with empty strings. A long record appends positional
    /// columns, which are backfilled with empty values on every existing row.
    pub fn append_record(&mut self, fields: Vec<String>) -> RowId {
        while self.columns.len() < fields.len() {
            let name = self.next_positional_name();
            self.add_column(name);
        }

        let mut cells: HashMap<ColumnId, String> = self
            .columns
            .iter()
            .map(|c| (c.id, String::new()))
            .collect();
        for (column, value) in self.columns.iter().zip(fields) {
            cells.insert(column.id, value);
        }

        let id = self.allocate_row_id();
        self.index.insert(id, self.rows.len());
        self.rows.push(Row { id, cells });
        id
    }

    /// `Column N` for the lowest N past the column count that no header uses yet
    fn next_positional_name(&self) -> String {
        (self.columns.len() + 1..)
            .map(|n| format!("Column {n}"))
            .find(|name| self.columns.iter().all(|c| c.display_name != *name))
            .unwrap_or_default()
    }

    fn allocate_row_id(&mut self) -> RowId {
        let id = RowId::from(self.next_row_id);
        self.next_row_id += 1;
        id
    }

    fn allocate_column_id(&mut self) -> ColumnId {
        let id = ColumnId::from(self.next_column_id);
        self.next_column_id += 1;
        id
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Columns in display order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.display_name.clone()).collect()
    }

    pub fn visible_columns(&self) -> Vec<ColumnId> {
        self.columns
            .iter()
            .filter(|c| c.visible)
            .map(|c| c.id)
            .collect()
    }

    pub fn column_position(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<ColumnId> {
        self.columns
            .iter()
            .find(|c| c.display_name == name)
            .map(|c| c.id)
    }

    /// Column at a display position
    pub fn column_at(&self, position: usize) -> Option<ColumnId> {
        self.columns.get(position).map(|c| c.id)
    }

    /// Rows in natural (insertion) order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.index.get(&id).map(|&i| &self.rows[i])
    }

    pub fn contains_row(&self, id: RowId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|r| r.id).collect()
    }

    pub fn cell(&self, row: RowId, column: ColumnId) -> Result<&str> {
        if self.column(column).is_none() {
            return Err(EngineError::invalid_reference(format!("column {column}")));
        }
        self.row(row)
            .map(|r| r.get(column))
            .ok_or_else(|| EngineError::invalid_reference(format!("row {row}")))
    }

    /// Values of a row restricted to `columns`, in the order given
    pub fn project(&self, row: RowId, columns: &[ColumnId]) -> Option<Vec<String>> {
        let row = self.row(row)?;
        Some(columns.iter().map(|&c| row.get(c).to_string()).collect())
    }

    /// Values of a row in column display order
    pub fn row_values(&self, row: RowId) -> Option<Vec<String>> {
        self.project(row, &self.column_ids())
    }

    /// Every row's values in natural order, columns in display order
    pub fn records(&self) -> Vec<Vec<String>> {
        let columns = self.column_ids();
        self.rows
            .iter()
            .map(|row| columns.iter().map(|&c| row.get(c).to_string()).collect())
            .collect()
    }

    pub fn edit_cell(&mut self, row: RowId, column: ColumnId, value: impl Into<String>) -> Result<()> {
        if self.column(column).is_none() {
            return Err(EngineError::invalid_reference(format!("column {column}")));
        }
        let &i = self
            .index
            .get(&row)
            .ok_or_else(|| EngineError::invalid_reference(format!("row {row}")))?;
        self.rows[i].cells.insert(column, value.into());
        Ok(())
    }

    /// Remove rows by id. Ids already absent are ignored. Returns how many rows were removed.
    pub fn delete_rows<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = RowId>,
    {
        let doomed: HashSet<RowId> = ids
            .into_iter()
            .filter(|id| self.index.contains_key(id))
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        self.rows.retain(|r| !doomed.contains(&r.id));
        self.reindex();
        doomed.len()
    }

    fn reindex(&mut self) {
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();
    }

    fn renumber_columns(&mut self) {
        for (position, column) in self.columns.iter_mut().enumerate() {
            column.position = position;
        }
    }

    /// Append a column, empty on every row
    pub fn add_column(&mut self, name: impl Into<String>) -> ColumnId {
        self.insert_column(self.columns.len(), name, &HashMap::new())
    }

    /// Insert a column at `position` (clamped to the end).
    ///
    /// Rows missing from `values` get an empty cell.
    pub fn insert_column(
        &mut self,
        position: usize,
        name: impl Into<String>,
        values: &HashMap<RowId, String>,
    ) -> ColumnId {
        let id = self.allocate_column_id();
        let position = position.min(self.columns.len());
        self.columns.insert(
            position,
            Column {
                id,
                display_name: name.into(),
                visible: true,
                position,
            },
        );
        self.renumber_columns();
        for row in &mut self.rows {
            let value = values.get(&row.id).cloned().unwrap_or_default();
            row.cells.insert(id, value);
        }
        id
    }

    /// Drop columns and their cells. Fails without changes if any id is unknown.
    pub fn remove_columns(&mut self, ids: &[ColumnId]) -> Result<()> {
        if let Some(missing) = ids.iter().find(|id| self.column(**id).is_none()) {
            return Err(EngineError::invalid_reference(format!("column {missing}")));
        }
        let doomed: HashSet<ColumnId> = ids.iter().copied().collect();
        self.columns.retain(|c| !doomed.contains(&c.id));
        self.renumber_columns();
        for row in &mut self.rows {
            row.cells.retain(|k, _| !doomed.contains(k));
        }
        Ok(())
    }

    fn column_mut(&mut self, id: ColumnId) -> Result<&mut Column> {
        self.columns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::invalid_reference(format!("column {id}")))
    }

    pub fn rename_column(&mut self, id: ColumnId, name: impl Into<String>) -> Result<()> {
        self.column_mut(id)?.display_name = name.into();
        Ok(())
    }

    pub fn set_column_visible(&mut self, id: ColumnId, visible: bool) -> Result<()> {
        self.column_mut(id)?.visible = visible;
        Ok(())
    }

    /// Move a column to `new_position` (clamped to the last position)
    pub fn move_column(&mut self, id: ColumnId, new_position: usize) -> Result<()> {
        let from = self
            .column_position(id)
            .ok_or_else(|| EngineError::invalid_reference(format!("column {id}")))?;
        let column = self.columns.remove(from);
        let to = new_position.min(self.columns.len());
        self.columns.insert(to, column);
        self.renumber_columns();
        Ok(())
    }

    /// Reorder columns. `order` must name every current column exactly once.
    pub fn reorder_columns(&mut self, order: &[ColumnId]) -> Result<()> {
        let current: HashSet<ColumnId> = self.columns.iter().map(|c| c.id).collect();
        let requested: HashSet<ColumnId> = order.iter().copied().collect();
        if order.len() != self.columns.len() || requested != current {
            return Err(EngineError::invalid_reference(
                "column order is not a permutation of the current columns",
            ));
        }
        let mut by_id: HashMap<ColumnId, Column> =
            self.columns.drain(..).map(|c| (c.id, c)).collect();
        self.columns = order.iter().filter_map(|id| by_id.remove(id)).collect();
        self.renumber_columns();
        Ok(())
    }

    /// Build the dataset that replaces this one after a tabular rewrite.
    ///
    /// Result columns are matched to existing ones by display name (first unused match),
    /// keeping their id and visibility; unmatched names get fresh ids. Rows listed in
    /// `retain` are carried over with their ids and re-keyed to the new columns, ahead
    /// of `records`, which all get fresh row ids. Id counters continue from this dataset.
    pub fn rebuilt_from_table(
        &self,
        names: &[String],
        records: Vec<Vec<String>>,
        retain: &[RowId],
    ) -> Dataset {
        let mut next = Dataset {
            columns: Vec::with_capacity(names.len()),
            rows: Vec::new(),
            index: HashMap::new(),
            next_row_id: self.next_row_id,
            next_column_id: self.next_column_id,
        };

        let mut claimed: HashSet<ColumnId> = HashSet::new();
        for (position, name) in names.iter().enumerate() {
            let existing = self
                .columns
                .iter()
                .find(|c| c.display_name == *name && !claimed.contains(&c.id));
            let column = match existing {
                Some(c) => {
                    claimed.insert(c.id);
                    Column {
                        position,
                        ..c.clone()
                    }
                }
                None => Column {
                    id: next.allocate_column_id(),
                    display_name: name.clone(),
                    visible: true,
                    position,
                },
            };
            next.columns.push(column);
        }

        let keep: HashSet<RowId> = retain.iter().copied().collect();
        for row in self.rows.iter().filter(|r| keep.contains(&r.id)) {
            let cells = next
                .columns
                .iter()
                .map(|c| (c.id, row.get(c.id).to_string()))
                .collect();
            next.index.insert(row.id, next.rows.len());
            next.rows.push(Row { id: row.id, cells });
        }
        for record in records {
            next.append_record(record);
        }
        next
    }

    /// Continue id allocation past everything `other` has handed out.
    ///
    /// Used when an older snapshot becomes current again so ids stay unique.
    pub fn adopt_counters(&mut self, other: &Dataset) {
        self.next_row_id = self.next_row_id.max(other.next_row_id);
        self.next_column_id = self.next_column_id.max(other.next_column_id);
    }
}
