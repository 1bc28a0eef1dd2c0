use crate::core::{ColumnId, DEFAULT_DELIMITER, ExportTemplate, FilterSpec, FilterTemplate, SortSpec};
use crate::services::script_service::ScriptScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};
use tracing::info;

const STATE_FILE: &str = "texttable_workspace_state.json";

/// Column attributes as persisted between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnState {
    pub id: ColumnId,
    pub display_name: String,
    pub visible: bool,
    pub position: usize,
}

/// Serializable snapshot of everything a session wants restored next time.
///
/// The engine accepts this at startup and produces it at shutdown; where it is
/// stored is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceState {
    pub delimiter: String,
    pub columns: Vec<ColumnState>,
    pub filters: Vec<FilterSpec>,
    pub global_filter: String,
    pub sort: Option<SortSpec>,
    pub export_templates: Vec<ExportTemplate>,
    pub filter_templates: Vec<FilterTemplate>,
    pub recent_files: Vec<PathBuf>,
    pub last_files: Vec<PathBuf>,
    pub restore_session: bool,
    pub script_folder: Option<PathBuf>,
    pub last_script: Option<String>,
    pub last_script_scope: ScriptScope,
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            columns: Vec::new(),
            filters: Vec::new(),
            global_filter: String::new(),
            sort: None,
            export_templates: Vec::new(),
            filter_templates: Vec::new(),
            recent_files: Vec::new(),
            last_files: Vec::new(),
            restore_session: false,
            script_folder: None,
            last_script: None,
            last_script_scope: ScriptScope::Full,
            saved_at: None,
        }
    }
}

impl WorkspaceState {
    /// Move `path` to the front of the recent list, keeping at most `max` entries
    pub fn add_recent_file(&mut self, path: &Path, max: usize) {
        self.recent_files.retain(|p| p != path);
        self.recent_files.insert(0, path.to_path_buf());
        self.recent_files.truncate(max);
    }

    /// Store or replace (by name) a filter template
    pub fn save_filter_template(&mut self, template: FilterTemplate) {
        match self.filter_templates.iter_mut().find(|t| t.name == template.name) {
            Some(existing) => *existing = template,
            None => self.filter_templates.push(template),
        }
    }

    /// Store or replace (by name) an export template
    pub fn save_export_template(&mut self, template: ExportTemplate) {
        match self.export_templates.iter_mut().find(|t| t.name == template.name) {
            Some(existing) => *existing = template,
            None => self.export_templates.push(template),
        }
    }

    pub fn save_to(&self, workspace_path: &Path) -> color_eyre::Result<()> {
        if workspace_path.exists() && !workspace_path.is_dir() {
            return Err(color_eyre::eyre::eyre!(
                "Workspace path is not a directory: {}",
                workspace_path.display()
            ));
        }
        create_dir_all(workspace_path)?;
        let file = File::create(workspace_path.join(STATE_FILE))?;
        serde_json::to_writer_pretty(file, &self)?;
        info!("Saved workspace state to {}", workspace_path.display());
        Ok(())
    }

    pub fn load_from(workspace_path: &Path) -> color_eyre::Result<Option<Self>> {
        let file_path = workspace_path.join(STATE_FILE);
        if !file_path.exists() {
            return Ok(None);
        }
        let file = File::open(file_path)?;
        let state: WorkspaceState = serde_json::from_reader(file)?;
        info!("Loaded workspace state from {}", workspace_path.display());
        Ok(Some(state))
    }
}
