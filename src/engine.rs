//! The table engine: owns the dataset and everything derived from it.
//!
//! Every mutation builds the next dataset state first and swaps it in only when it
//! succeeded, records the previous state for undo, and recomputes the view.

use crate::core::{
    ColumnId, Dataset, EngineError, ExportScope, ExportTemplate, FilterSpec, FilterTemplate, Result, RowId,
    SortSpec, parser,
};
use crate::services::batch_service::{BatchOutcome, BatchRequest, BatchService};
use crate::services::dedup_service::{DedupPlan, DedupPreview, DedupService, GroupReport, KeepPolicy};
use crate::services::filter_service::{DEFAULT_PARALLEL_THRESHOLD, FilterService};
use crate::services::script_service::{
    ScriptConsole, ScriptRun, ScriptScope, ScriptService, ScriptSummary, ScriptTable, TransformScript,
};
use crate::services::sort_service::SortService;
use crate::services::view::ViewIndex;
use crate::workspace::{ColumnState, WorkspaceState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Tunables the engine reads from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub delimiter: String,
    pub max_undo: usize,
    pub max_recent_files: usize,
    pub parallel_threshold: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            delimiter: crate::core::DEFAULT_DELIMITER.to_string(),
            max_undo: 20,
            max_recent_files: 10,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// Files read and decoded but not yet committed to a dataset
#[derive(Debug, Clone, Default)]
pub struct LoadedText {
    pub files: Vec<PathBuf>,
    pub records: Vec<Vec<String>>,
    pub skipped: Vec<(PathBuf, String)>,
    /// Files that only decoded with replacement characters
    pub lossy: Vec<PathBuf>,
}

/// Summary of a load for the caller to report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub files_loaded: usize,
    pub rows_added: usize,
    pub skipped: Vec<(PathBuf, String)>,
    pub lossy: Vec<PathBuf>,
}

pub struct TableEngine {
    dataset: Dataset,
    settings: EngineSettings,
    filters: Vec<FilterSpec>,
    global_filter: String,
    sort: Option<SortSpec>,
    view: ViewIndex,
    rejected_filters: Vec<EngineError>,
    undo_stack: VecDeque<Dataset>,
    redo_stack: Vec<Dataset>,
    /// Persisted bookkeeping that is carried through but not interpreted by the engine
    session: WorkspaceState,
}

impl Default for TableEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl TableEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_dataset(Dataset::new(), settings)
    }

    pub fn with_dataset(dataset: Dataset, settings: EngineSettings) -> Self {
        let session = WorkspaceState {
            delimiter: settings.delimiter.clone(),
            ..Default::default()
        };
        let mut engine = Self {
            dataset,
            settings,
            filters: Vec::new(),
            global_filter: String::new(),
            sort: None,
            view: ViewIndex::default(),
            rejected_filters: Vec::new(),
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            session,
        };
        engine.refresh_view();
        engine
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn delimiter(&self) -> &str {
        &self.settings.delimiter
    }

    /// Change the delimiter used for parsing, whole-row keys and copy text
    pub fn set_delimiter(&mut self, delimiter: impl Into<String>) {
        self.settings.delimiter = delimiter.into();
        if matches!(self.sort, Some(SortSpec::WholeRow { .. })) {
            self.refresh_view();
        }
    }

    pub fn view(&self) -> &ViewIndex {
        &self.view
    }

    /// Filters dropped from the AND chain during the last recomputation
    pub fn rejected_filters(&self) -> &[EngineError] {
        &self.rejected_filters
    }

    fn refresh_view(&mut self) {
        let mut specs = self.filters.clone();
        if !self.global_filter.is_empty() {
            specs.push(FilterSpec::global(self.global_filter.clone()));
        }
        let outcome = FilterService::evaluate_with(&self.dataset, &specs, self.settings.parallel_threshold);
        self.rejected_filters = outcome.rejected;

        // Filtered rows stay in dataset order and the sort is stable, so ties keep
        // dataset order and the view depends only on the dataset and the active specs.
        let order = match self.sort {
            None => outcome.visible,
            Some(spec) => match SortService::order(&self.dataset, &outcome.visible, &spec, &self.settings.delimiter) {
                Ok(order) => order,
                Err(e) => {
                    warn!("Dropping sort {:?}: {}", spec, e);
                    self.sort = None;
                    outcome.visible
                }
            },
        };

        debug!(
            "View recomputed: {} of {} rows visible",
            order.len(),
            self.dataset.row_count()
        );
        self.view = ViewIndex::new(order);
    }

    fn push_undo(&mut self, snapshot: Dataset) {
        if self.settings.max_undo == 0 {
            return;
        }
        self.undo_stack.push_back(snapshot);
        while self.undo_stack.len() > self.settings.max_undo {
            self.undo_stack.pop_front();
        }
    }

    /// Swap in a new dataset state
    fn commit(&mut self, next: Dataset) {
        let previous = std::mem::replace(&mut self.dataset, next);
        self.push_undo(previous);
        self.redo_stack.clear();
        self.refresh_view();
    }

    /// Apply `f` to a copy of the dataset and commit the copy only if `f` succeeded
    fn mutate<T>(&mut self, f: impl FnOnce(&mut Dataset) -> Result<T>) -> Result<T> {
        let mut next = self.dataset.clone();
        let value = f(&mut next)?;
        self.commit(next);
        Ok(value)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        let Some(mut restored) = self.undo_stack.pop_back() else {
            return false;
        };
        restored.adopt_counters(&self.dataset);
        let current = std::mem::replace(&mut self.dataset, restored);
        self.redo_stack.push(current);
        self.refresh_view();
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(mut restored) = self.redo_stack.pop() else {
            return false;
        };
        restored.adopt_counters(&self.dataset);
        let current = std::mem::replace(&mut self.dataset, restored);
        self.push_undo(current);
        self.refresh_view();
        true
    }

    // ---- loading -------------------------------------------------------

    /// Append pasted or piped text. Returns the number of rows added.
    pub fn load_text(&mut self, text: &str) -> usize {
        let mut next = self.dataset.clone();
        let added = next.append_text(text, &self.settings.delimiter);
        if added > 0 {
            self.commit(next);
        }
        added
    }

    /// Read and decode files without touching any engine state.
    ///
    /// Unreadable files are skipped and listed in the result.
    pub fn read_files(paths: &[PathBuf], delimiter: &str) -> LoadedText {
        let mut loaded = LoadedText::default();
        for path in paths {
            match std::fs::read(path) {
                Ok(raw) => {
                    let decoded = parser::decode_bytes(&raw);
                    if decoded.had_errors {
                        warn!("{} decoded with replacement characters", path.display());
                        loaded.lossy.push(path.clone());
                    }
                    debug!("Read {} as {}", path.display(), decoded.encoding);
                    loaded.records.extend(parser::parse_text(&decoded.text, delimiter));
                    loaded.files.push(path.clone());
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    loaded.skipped.push((path.clone(), e.to_string()));
                }
            }
        }
        loaded
    }

    /// Append previously read files, file-then-line order, and record them as recent
    pub fn commit_loaded(&mut self, loaded: LoadedText) -> LoadReport {
        let rows_added = loaded.records.len();
        if rows_added > 0 {
            let mut next = self.dataset.clone();
            for record in loaded.records {
                next.append_record(record);
            }
            self.commit(next);
        }
        for path in &loaded.files {
            self.session.add_recent_file(path, self.settings.max_recent_files);
            if !self.session.last_files.contains(path) {
                self.session.last_files.push(path.clone());
            }
        }
        info!(
            "Loaded {} files ({} rows), skipped {}",
            loaded.files.len(),
            rows_added,
            loaded.skipped.len()
        );
        LoadReport {
            files_loaded: loaded.files.len(),
            rows_added,
            skipped: loaded.skipped,
            lossy: loaded.lossy,
        }
    }

    pub fn load_files(&mut self, paths: &[PathBuf]) -> LoadReport {
        let loaded = Self::read_files(paths, &self.settings.delimiter);
        self.commit_loaded(loaded)
    }

    /// Start over with an empty dataset. Undo history is kept.
    pub fn clear(&mut self) {
        let mut next = Dataset::new();
        next.adopt_counters(&self.dataset);
        self.commit(next);
        self.session.last_files.clear();
    }

    // ---- edits ---------------------------------------------------------

    pub fn edit_cell(&mut self, row: RowId, column: ColumnId, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        self.mutate(|ds| ds.edit_cell(row, column, value))
    }

    /// Edit the cell at a view position
    pub fn edit_cell_at(&mut self, position: usize, column: ColumnId, value: impl Into<String>) -> Result<()> {
        let row = self
            .view
            .position_to_row_id(position)
            .ok_or_else(|| EngineError::invalid_reference(format!("view position {position}")))?;
        self.edit_cell(row, column, value)
    }

    /// Delete rows by id. Absent ids are ignored.
    pub fn delete_rows(&mut self, ids: &[RowId]) -> usize {
        if !ids.iter().any(|id| self.dataset.contains_row(*id)) {
            return 0;
        }
        let mut next = self.dataset.clone();
        let removed = next.delete_rows(ids.iter().copied());
        self.commit(next);
        info!("Deleted {} rows", removed);
        removed
    }

    /// Delete the rows at the given view positions. Positions are resolved to row ids
    /// before anything is removed.
    pub fn delete_selected(&mut self, positions: &[usize]) -> Result<usize> {
        let ids = self.view.resolve_selection(positions)?;
        Ok(self.delete_rows(&ids))
    }

    pub fn apply_batch(&mut self, request: &BatchRequest) -> Result<BatchOutcome> {
        match BatchService::apply(&self.dataset, request) {
            Ok((next, outcome)) => {
                self.commit(next);
                Ok(outcome)
            }
            Err(e) => {
                warn!("Batch operation aborted: {}", e);
                Err(e)
            }
        }
    }

    // ---- dedup / group ------------------------------------------------

    pub fn dedup_preview(&self, key_columns: &[ColumnId], keep: KeepPolicy) -> Result<DedupPreview> {
        DedupService::preview(&self.dataset, key_columns, keep)
    }

    /// Remove duplicate rows, keeping the first or last of each key group
    pub fn dedup(&mut self, key_columns: &[ColumnId], keep: KeepPolicy) -> Result<DedupPlan> {
        let plan = DedupService::plan(&self.dataset, key_columns, keep)?;
        self.delete_rows(&plan.removed);
        info!("Dedup removed {} rows", plan.removed_count());
        Ok(plan)
    }

    pub fn group(&self, key_columns: &[ColumnId]) -> Result<GroupReport> {
        DedupService::group(&self.dataset, key_columns)
    }

    /// Group only the rows in the current view
    pub fn group_view(&self, key_columns: &[ColumnId]) -> Result<GroupReport> {
        DedupService::group_rows(&self.dataset, self.view.row_ids(), key_columns)
    }

    // ---- scripts -------------------------------------------------------

    /// Run a transform script and, unless `dry_run`, replace the dataset with its result.
    ///
    /// With [`ScriptScope::FilteredView`] the script sees only the visible rows; rows
    /// outside the view are kept (ahead of the script's rows) and re-keyed to the
    /// returned columns.
    pub fn run_script(
        &mut self,
        script: &dyn TransformScript,
        scope: ScriptScope,
        dry_run: bool,
        console: &mut ScriptConsole,
    ) -> Result<ScriptRun> {
        self.session.last_script = Some(script.name().to_string());
        self.session.last_script_scope = scope;

        let (in_scope, retain): (Vec<RowId>, Vec<RowId>) = match scope {
            ScriptScope::Full => (self.dataset.row_ids(), Vec::new()),
            ScriptScope::FilteredView => {
                let retain = self
                    .dataset
                    .row_ids()
                    .into_iter()
                    .filter(|id| !self.view.contains(*id))
                    .collect();
                (self.view.row_ids().to_vec(), retain)
            }
        };

        let input = ScriptTable::from_dataset(&self.dataset, &in_scope);
        let output = ScriptService::execute(script, &input, console)?;
        let next = self.dataset.rebuilt_from_table(&output.columns, output.rows, &retain);

        let summary = ScriptSummary {
            row_count_before: self.dataset.row_count(),
            row_count_after: next.row_count(),
            column_count_before: self.dataset.column_count(),
            column_count_after: next.column_count(),
        };
        if !dry_run {
            self.commit(next);
        }
        info!(
            "Script {} ({}{}): rows {} -> {}, columns {} -> {}",
            script.name(),
            scope,
            if dry_run { ", dry run" } else { "" },
            summary.row_count_before,
            summary.row_count_after,
            summary.column_count_before,
            summary.column_count_after
        );

        Ok(ScriptRun {
            summary,
            stdout: console.stdout().to_string(),
            stderr: console.stderr().to_string(),
            committed: !dry_run,
        })
    }

    // ---- column manager -----------------------------------------------

    pub fn rename_column(&mut self, id: ColumnId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.mutate(|ds| ds.rename_column(id, name))
    }

    pub fn set_column_visible(&mut self, id: ColumnId, visible: bool) -> Result<()> {
        self.mutate(|ds| ds.set_column_visible(id, visible))
    }

    pub fn move_column(&mut self, id: ColumnId, new_position: usize) -> Result<()> {
        self.mutate(|ds| ds.move_column(id, new_position))
    }

    pub fn reorder_columns(&mut self, order: &[ColumnId]) -> Result<()> {
        self.mutate(|ds| ds.reorder_columns(order))
    }

    pub fn remove_columns(&mut self, ids: &[ColumnId]) -> Result<()> {
        self.mutate(|ds| ds.remove_columns(ids))
    }

    pub fn insert_column(
        &mut self,
        position: usize,
        name: impl Into<String>,
        values: &HashMap<RowId, String>,
    ) -> Result<ColumnId> {
        let name = name.into();
        self.mutate(|ds| Ok(ds.insert_column(position, name, values)))
    }

    // ---- filter / sort -----------------------------------------------

    pub fn filters(&self) -> &[FilterSpec] {
        &self.filters
    }

    /// Replace the per-column filters. Returns the specs that were rejected.
    pub fn set_filters(&mut self, filters: Vec<FilterSpec>) -> &[EngineError] {
        self.filters = filters;
        self.refresh_view();
        &self.rejected_filters
    }

    pub fn add_filter(&mut self, filter: FilterSpec) -> &[EngineError] {
        self.filters.push(filter);
        self.refresh_view();
        &self.rejected_filters
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.global_filter.clear();
        self.refresh_view();
    }

    pub fn global_filter(&self) -> &str {
        &self.global_filter
    }

    /// Case-insensitive text matched against every column; empty disables it
    pub fn set_global_filter(&mut self, text: impl Into<String>) {
        self.global_filter = text.into();
        self.refresh_view();
    }

    pub fn sort(&self) -> Option<SortSpec> {
        self.sort
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) -> Result<()> {
        if let Some(SortSpec::Column { column, .. }) = sort {
            if self.dataset.column(column).is_none() {
                return Err(EngineError::invalid_reference(format!("sort column {column}")));
            }
        }
        self.sort = sort;
        self.refresh_view();
        Ok(())
    }

    pub fn filter_templates(&self) -> &[FilterTemplate] {
        &self.session.filter_templates
    }

    /// Save the active filters under `name`, replacing a template of the same name
    pub fn save_filter_template(&mut self, name: impl Into<String>) {
        let template = FilterTemplate {
            name: name.into(),
            filters: self.filters.clone(),
            global: self.global_filter.clone(),
        };
        self.session.save_filter_template(template);
    }

    pub fn apply_filter_template(&mut self, name: &str) -> Result<&[EngineError]> {
        let template = self
            .session
            .filter_templates
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| EngineError::invalid_reference(format!("filter template {name:?}")))?;
        self.filters = template.filters;
        self.global_filter = template.global;
        self.refresh_view();
        Ok(&self.rejected_filters)
    }

    // ---- reading the view ---------------------------------------------

    /// Values of the visible rows, restricted to `columns`, in view order
    pub fn view_rows(&self, columns: &[ColumnId]) -> Vec<Vec<String>> {
        self.view
            .row_ids()
            .iter()
            .filter_map(|&id| self.dataset.project(id, columns))
            .collect()
    }

    fn check_columns(&self, columns: &[ColumnId]) -> Result<()> {
        match columns.iter().find(|c| self.dataset.column(**c).is_none()) {
            Some(missing) => Err(EngineError::invalid_reference(format!("column {missing}"))),
            None => Ok(()),
        }
    }

    /// Clipboard text for the selected view positions: one line per row in view
    /// order, cells joined by the delimiter. Defaults to the visible columns.
    pub fn copy_text(&self, positions: &[usize], columns: Option<&[ColumnId]>) -> Result<String> {
        let ids = self.view.resolve_selection(positions)?;
        let columns = match columns {
            Some(columns) => columns.to_vec(),
            None => self.dataset.visible_columns(),
        };
        self.check_columns(&columns)?;
        let rows: Vec<Vec<String>> = ids
            .iter()
            .filter_map(|&id| self.dataset.project(id, &columns))
            .collect();
        Ok(parser::rows_to_text(&rows, &self.settings.delimiter))
    }

    /// Header and rows an exporter should write for `template`, reflecting the
    /// active filter and sort. An empty `column_order` means the visible columns.
    pub fn export_rows(&self, template: &ExportTemplate, selected: &[usize]) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        let columns = if template.column_order.is_empty() {
            self.dataset.visible_columns()
        } else {
            template.column_order.clone()
        };
        self.check_columns(&columns)?;

        let ids = match template.scope {
            ExportScope::View => self.view.row_ids().to_vec(),
            ExportScope::SelectedRows => self.view.resolve_selection(selected)?,
        };
        let header = columns
            .iter()
            .filter_map(|c| self.dataset.column(*c).map(|col| col.display_name.clone()))
            .collect();
        let rows = ids
            .iter()
            .filter_map(|&id| self.dataset.project(id, &columns))
            .collect();
        Ok((header, rows))
    }

    pub fn export_templates(&self) -> &[ExportTemplate] {
        &self.session.export_templates
    }

    pub fn save_export_template(&mut self, template: ExportTemplate) {
        self.session.save_export_template(template);
    }

    // ---- session -------------------------------------------------------

    pub fn recent_files(&self) -> &[PathBuf] {
        &self.session.recent_files
    }

    pub fn set_script_folder(&mut self, folder: Option<&Path>) {
        self.session.script_folder = folder.map(Path::to_path_buf);
    }

    pub fn set_restore_session(&mut self, restore: bool) {
        self.session.restore_session = restore;
    }

    /// Snapshot of the engine's persistable state
    pub fn capture_workspace(&self) -> WorkspaceState {
        WorkspaceState {
            delimiter: self.settings.delimiter.clone(),
            columns: self
                .dataset
                .columns()
                .iter()
                .map(|c| ColumnState {
                    id: c.id,
                    display_name: c.display_name.clone(),
                    visible: c.visible,
                    position: c.position,
                })
                .collect(),
            filters: self.filters.clone(),
            global_filter: self.global_filter.clone(),
            sort: self.sort,
            saved_at: Some(Utc::now()),
            ..self.session.clone()
        }
    }

    /// Adopt persisted state. Column states apply to columns whose ids exist in the
    /// current dataset; other entries are ignored. Does not create an undo entry.
    pub fn apply_workspace(&mut self, state: &WorkspaceState) {
        self.session = state.clone();
        self.settings.delimiter = state.delimiter.clone();
        self.session.recent_files.truncate(self.settings.max_recent_files);

        let mut states: Vec<&ColumnState> = state
            .columns
            .iter()
            .filter(|c| self.dataset.column(c.id).is_some())
            .collect();
        if states.len() < state.columns.len() {
            warn!(
                "Ignoring {} persisted column states with no matching column",
                state.columns.len() - states.len()
            );
        }
        for column in &states {
            if let Err(e) = self.dataset.rename_column(column.id, column.display_name.clone()) {
                warn!("Ignoring persisted name for column {}: {}", column.id, e);
            }
            if let Err(e) = self.dataset.set_column_visible(column.id, column.visible) {
                warn!("Ignoring persisted visibility for column {}: {}", column.id, e);
            }
        }
        states.sort_by_key(|c| c.position);
        let mut order: Vec<ColumnId> = states.iter().map(|c| c.id).collect();
        let unlisted: Vec<ColumnId> = self
            .dataset
            .column_ids()
            .into_iter()
            .filter(|id| !order.contains(id))
            .collect();
        order.extend(unlisted);
        if let Err(e) = self.dataset.reorder_columns(&order) {
            warn!("Ignoring persisted column order: {}", e);
        }

        self.filters = state.filters.clone();
        self.global_filter = state.global_filter.clone();
        self.sort = state.sort;
        self.refresh_view();
        info!(
            "Applied workspace: {} filters, sort {:?}, {} rejected",
            self.filters.len(),
            self.sort,
            self.rejected_filters.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FilterMode, Scope};
    use crate::services::batch_service::Operation;
    use crate::services::script_service::FnScript;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine(text: &str) -> TableEngine {
        let mut engine = TableEngine::default();
        engine.load_text(text);
        engine
    }

    fn view_text(engine: &TableEngine) -> Vec<String> {
        let columns = engine.dataset().column_ids();
        engine
            .view_rows(&columns)
            .into_iter()
            .map(|r| r.join("----"))
            .collect()
    }

    #[test]
    fn test_filter_then_sort_only_covers_visible_rows() {
        let mut engine = engine("b----2\na----1\nc----3\nab----0");
        let first = engine.dataset().column_ids()[0];
        engine.add_filter(FilterSpec::new(first, FilterMode::Contains, "a"));
        engine
            .set_sort(Some(SortSpec::Column {
                column: first,
                ascending: true,
            }))
            .unwrap();
        assert_eq!(view_text(&engine), vec!["a----1", "ab----0"]);
    }

    #[test]
    fn test_delete_selected_resolves_ids_first() {
        let mut engine = engine("a\nb\nc\nd");
        engine.set_sort(Some(SortSpec::WholeRow { ascending: false })).unwrap();
        assert_eq!(view_text(&engine), vec!["d", "c", "b", "a"]);

        let removed = engine.delete_selected(&[0, 2]).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(view_text(&engine), vec!["c", "a"]);
    }

    #[test]
    fn test_undo_redo_keeps_ids_unique() {
        let mut engine = engine("a\nb");
        let ids = engine.dataset().row_ids();
        engine.delete_rows(&[ids[0]]);
        engine.load_text("c");
        let c_id = *engine.dataset().row_ids().last().unwrap();

        assert!(engine.undo());
        assert!(engine.undo());
        assert_eq!(engine.dataset().row_ids(), ids);
        engine.load_text("d");
        let d_id = *engine.dataset().row_ids().last().unwrap();
        assert!(d_id > c_id, "ids are never reused after undo");
        assert!(!engine.can_redo());
    }

    #[test]
    fn test_undo_limit() {
        let mut engine = TableEngine::new(EngineSettings {
            max_undo: 2,
            ..Default::default()
        });
        for line in ["a", "b", "c", "d"] {
            engine.load_text(line);
        }
        assert!(engine.undo());
        assert!(engine.undo());
        assert!(!engine.undo());
        assert_eq!(engine.dataset().row_count(), 2);
        assert!(engine.redo());
        assert_eq!(engine.dataset().row_count(), 3);
    }

    #[test]
    fn test_failed_batch_leaves_state() {
        let mut engine = engine("a----b");
        let before = engine.dataset().records();
        let request = BatchRequest {
            scope: Scope::Table,
            target_columns: engine.dataset().column_ids(),
            operation: Operation::Split {
                delimiter: String::new(),
                keep_original: true,
            },
        };
        assert!(engine.apply_batch(&request).is_err());
        assert_eq!(engine.dataset().records(), before);
        assert!(engine.can_undo(), "only the initial load is on the stack");
        engine.undo();
        assert!(!engine.can_undo());
    }

    #[test]
    fn test_script_dry_run_and_commit() {
        let mut engine = engine("a----1\nb----2");
        let script = FnScript::new("drop-second-column", |table, _console: &mut ScriptConsole| {
            let rows: Vec<serde_json::Value> = table["rows"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|r| json!([r[0]]))
                .collect();
            Ok(json!({"columns": ["Column 1"], "rows": rows}))
        });

        let run = engine
            .run_script(&script, ScriptScope::Full, true, &mut ScriptConsole::new())
            .unwrap();
        assert!(!run.committed);
        assert_eq!(run.summary.column_count_before, 2);
        assert_eq!(run.summary.column_count_after, 1);
        assert_eq!(engine.dataset().column_count(), 2);

        engine
            .run_script(&script, ScriptScope::Full, false, &mut ScriptConsole::new())
            .unwrap();
        assert_eq!(engine.dataset().records(), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_filtered_view_script_keeps_hidden_rows() {
        let mut engine = engine("a----1\nb----2\nc----3");
        let first = engine.dataset().column_ids()[0];
        engine.add_filter(FilterSpec::new(first, FilterMode::Equals, "b"));
        let script = FnScript::new("upper", |table, _console: &mut ScriptConsole| {
            let mut table = table;
            if let Some(rows) = table["rows"].as_array_mut() {
                for row in rows {
                    row[0] = json!(row[0].as_str().unwrap_or("").to_uppercase());
                }
            }
            Ok(table)
        });
        engine
            .run_script(&script, ScriptScope::FilteredView, false, &mut ScriptConsole::new())
            .unwrap();
        engine.clear_filters();
        assert_eq!(view_text(&engine), vec!["a----1", "c----3", "B----2"]);
    }

    #[test]
    fn test_copy_and_export_rows() {
        let mut engine = engine("a----1----x\nb----2----y");
        let cols = engine.dataset().column_ids();
        engine.set_column_visible(cols[2], false).unwrap();
        engine.set_sort(Some(SortSpec::RowId { ascending: false })).unwrap();

        assert_eq!(engine.copy_text(&[0, 1], None).unwrap(), "b----2\na----1");

        let template = ExportTemplate {
            name: "t".into(),
            export_kind: crate::core::ExportKind::Txt,
            column_order: vec![cols[2], cols[0]],
            delimiter: "|".into(),
            scope: ExportScope::SelectedRows,
        };
        let (header, rows) = engine.export_rows(&template, &[1]).unwrap();
        assert_eq!(header, vec!["Column 3", "Column 1"]);
        assert_eq!(rows, vec![vec!["x", "a"]]);
    }

    #[test]
    fn test_filter_templates() {
        let mut engine = engine("a\nb");
        engine.set_global_filter("a");
        engine.save_filter_template("only-a");
        engine.clear_filters();
        assert_eq!(engine.view().len(), 2);
        engine.apply_filter_template("only-a").unwrap();
        assert_eq!(engine.view().len(), 1);
        assert!(engine.apply_filter_template("missing").is_err());
    }

    #[test]
    fn test_workspace_capture_and_apply() {
        let mut engine = engine("a----1\nb----2");
        let cols = engine.dataset().column_ids();
        engine.rename_column(cols[1], "qty").unwrap();
        engine.move_column(cols[1], 0).unwrap();
        engine.add_filter(FilterSpec::new(cols[0], FilterMode::Equals, "b"));
        let state = engine.capture_workspace();

        let mut fresh = self::engine("a----1\nb----2");
        fresh.apply_workspace(&state);
        assert_eq!(fresh.dataset().column_names(), vec!["qty", "Column 1"]);
        assert_eq!(fresh.view().len(), 1);
        assert_eq!(fresh.capture_workspace().filters, state.filters);
    }

    #[test]
    fn test_toggling_filters_does_not_reorder_sort_ties() {
        let mut engine = engine("a----1\nb----1\nc----2");
        let cols = engine.dataset().column_ids();
        let sort = SortSpec::Column {
            column: cols[1],
            ascending: true,
        };
        engine.set_sort(Some(sort)).unwrap();
        engine.add_filter(FilterSpec::new(cols[0], FilterMode::NotContains, "a"));
        assert_eq!(view_text(&engine), vec!["b----1", "c----2"]);
        engine.clear_filters();
        assert_eq!(view_text(&engine), vec!["a----1", "b----1", "c----2"]);

        let mut fresh = self::engine("a----1\nb----1\nc----2");
        fresh.set_sort(Some(sort)).unwrap();
        assert_eq!(engine.view().row_ids(), fresh.view().row_ids());
    }

    #[test]
    fn test_edit_cell_at_resolves_view_position() {
        let mut engine = engine("a----1\nb----2\nc----3");
        let cols = engine.dataset().column_ids();
        engine.add_filter(FilterSpec::new(cols[0], FilterMode::NotContains, "b"));
        engine.set_sort(Some(SortSpec::RowId { ascending: false })).unwrap();
        let target = engine.view().position_to_row_id(0).unwrap();

        engine.edit_cell_at(0, cols[1], "30").unwrap();
        assert_eq!(engine.dataset().cell(target, cols[1]).unwrap(), "30");
        assert_eq!(
            engine.dataset().records(),
            vec![vec!["a", "1"], vec!["b", "2"], vec!["c", "30"]]
        );

        let err = engine.edit_cell_at(5, cols[1], "x").unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference(_)));
        assert!(engine.undo());
        assert_eq!(engine.dataset().cell(target, cols[1]).unwrap(), "3");
    }

    #[test]
    fn test_panicking_script_leaves_dataset() {
        let mut engine = engine("a----1\nb----2");
        let records = engine.dataset().records();
        let names = engine.dataset().column_names();
        let script = FnScript::new(
            "panics",
            |_table, console: &mut ScriptConsole| -> anyhow::Result<serde_json::Value> {
                console.print("before the panic");
                panic!("boom")
            },
        );

        let err = engine
            .run_script(&script, ScriptScope::Full, false, &mut ScriptConsole::new())
            .unwrap_err();
        match err {
            EngineError::ScriptExecution { message, stdout, .. } => {
                assert!(message.contains("panicked"), "{message}");
                assert!(stdout.contains("before the panic"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(engine.dataset().records(), records);
        assert_eq!(engine.dataset().column_names(), names);
        // only the load is on the undo stack
        assert_eq!(engine.undo_stack.len(), 1);
    }
}
