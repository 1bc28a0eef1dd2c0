use crate::core::{EngineError, Result};
use crate::engine::{EngineSettings, LoadReport, TableEngine};
use crate::services::script_service::{ScriptConsole, ScriptRun, ScriptScope, TransformScript};
use crate::workspace::WorkspaceState;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{info, warn};

/// DataService is the shared handle to a table engine
///
/// This service is responsible for:
/// - Serializing mutations: at most one is in flight, a second one gets `EngineError::Busy`
/// - Loading files and running scripts on blocking worker threads
/// - Restoring and saving the workspace state between sessions
#[derive(Clone)]
pub struct DataService {
    engine: Arc<Mutex<TableEngine>>,

    /// Directory the workspace state file lives in
    workspace_path: PathBuf,
}

impl DataService {
    pub fn new(engine: TableEngine, workspace_path: &Path) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            workspace_path: workspace_path.to_path_buf(),
        }
    }

    /// Create an engine for `workspace_path`, restoring its saved state if there is one.
    ///
    /// When the saved state asks for session restore, the last opened files are loaded
    /// again with the saved delimiter before the column and filter state is applied.
    pub fn open(workspace_path: &Path, settings: EngineSettings) -> color_eyre::Result<Self> {
        let mut engine = TableEngine::new(settings);
        if let Some(mut state) = WorkspaceState::load_from(workspace_path)? {
            if state.restore_session {
                engine.set_delimiter(state.delimiter.clone());
                let files = state.last_files.clone();
                let report = engine.load_files(&files);
                info!("Restored session: {} rows from {} files", report.rows_added, report.files_loaded);
            } else {
                state.columns.clear();
                state.filters.clear();
                state.global_filter.clear();
                state.sort = None;
                state.last_files.clear();
            }
            engine.apply_workspace(&state);
        }
        Ok(Self::new(engine, workspace_path))
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    fn lock(&self) -> MutexGuard<'_, TableEngine> {
        // A panic while holding the lock never leaves a half-applied commit behind.
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lock(engine: &Mutex<TableEngine>) -> Result<MutexGuard<'_, TableEngine>> {
        match engine.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(EngineError::Busy),
        }
    }

    /// Read from the engine, waiting for an in-flight mutation to finish
    pub fn read<R>(&self, f: impl FnOnce(&TableEngine) -> R) -> R {
        f(&self.lock())
    }

    /// Run a mutation, or fail with `Busy` if another one holds the engine
    pub fn mutate<R>(&self, f: impl FnOnce(&mut TableEngine) -> Result<R>) -> Result<R> {
        let mut guard = Self::try_lock(&self.engine)?;
        f(&mut guard)
    }

    /// Read and decode `paths` on a blocking worker, then append them to the dataset
    pub async fn load_files_in_background(&self, paths: Vec<PathBuf>) -> Result<LoadReport> {
        let delimiter = self.read(|engine| engine.delimiter().to_string());
        let loaded = tokio::task::spawn_blocking(move || TableEngine::read_files(&paths, &delimiter))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;
        self.mutate(|engine| Ok(engine.commit_loaded(loaded)))
    }

    /// Run a transform script on a blocking worker. The engine is held for the whole
    /// run, so other mutations are rejected until it finishes.
    pub async fn run_script_in_background(
        &self,
        script: Arc<dyn TransformScript>,
        scope: ScriptScope,
        dry_run: bool,
        mut console: ScriptConsole,
    ) -> Result<ScriptRun> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let mut guard = Self::try_lock(&engine)?;
            guard.run_script(script.as_ref(), scope, dry_run, &mut console)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?
    }

    pub fn save_workspace(&self) -> color_eyre::Result<()> {
        let state = self.read(|engine| engine.capture_workspace());
        if let Err(e) = state.save_to(&self.workspace_path) {
            warn!("Failed to save workspace state: {}", e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FilterMode, FilterSpec, SortSpec};
    use crate::jmes::JmesScript;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_second_mutation_is_busy() {
        let dir = TempDir::new().unwrap();
        let service = DataService::new(TableEngine::default(), dir.path());
        let _guard = service.engine.lock().unwrap();
        let err = service.mutate(|engine| Ok(engine.load_text("x"))).unwrap_err();
        assert!(matches!(err, EngineError::Busy));
    }

    #[tokio::test]
    async fn test_load_files_in_background() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", "a----1\nb----2\n");
        let b = write_file(&dir, "b.txt", "c----3\n");
        let missing = dir.path().join("missing.txt");
        let service = DataService::new(TableEngine::default(), dir.path());

        let report = service
            .load_files_in_background(vec![a.clone(), missing.clone(), b.clone()])
            .await
            .unwrap();
        assert_eq!(report.rows_added, 3);
        assert_eq!(report.files_loaded, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, missing);

        let records = service.read(|engine| engine.dataset().records());
        assert_eq!(records[2], vec!["c", "3"]);
        assert_eq!(service.read(|engine| engine.recent_files().to_vec()), vec![b, a]);
    }

    #[tokio::test]
    async fn test_script_in_background() {
        let dir = TempDir::new().unwrap();
        let mut engine = TableEngine::default();
        engine.load_text("apple----3\npear----1");
        let service = DataService::new(engine, dir.path());

        let script = Arc::new(JmesScript::new("[?contains(\"Column 1\", 'pp')]"));
        let run = service
            .run_script_in_background(script, ScriptScope::Full, true, ScriptConsole::new())
            .await
            .unwrap();
        assert_eq!(run.summary.row_count_after, 1);
        assert_eq!(run.summary.column_count_after, 2);
        assert!(!run.committed);
        assert_eq!(service.read(|engine| engine.dataset().row_count()), 2);
    }

    #[tokio::test]
    async fn test_script_in_background_is_busy_while_engine_held() {
        let dir = TempDir::new().unwrap();
        let mut engine = TableEngine::default();
        engine.load_text("apple----3\npear----1");
        let service = DataService::new(engine, dir.path());

        let guard = service.engine.lock().unwrap();
        let script = Arc::new(JmesScript::new("[?contains(\"Column 1\", 'pp')]"));
        let err = service
            .run_script_in_background(script, ScriptScope::Full, false, ScriptConsole::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Busy));
        drop(guard);
        assert_eq!(service.read(|engine| engine.dataset().row_count()), 2);
    }

    #[test]
    fn test_session_restore_uses_saved_delimiter() {
        let dir = TempDir::new().unwrap();
        let data = write_file(&dir, "pipes.txt", "b|2\na|1");

        let service = DataService::open(dir.path(), EngineSettings::default()).unwrap();
        service
            .mutate(|engine| {
                engine.set_delimiter("|");
                engine.load_files(&[data.clone()]);
                engine.set_restore_session(true);
                Ok(())
            })
            .unwrap();
        service.save_workspace().unwrap();

        let reopened = DataService::open(dir.path(), EngineSettings::default()).unwrap();
        reopened.read(|engine| {
            assert_eq!(engine.delimiter(), "|");
            assert_eq!(engine.dataset().column_count(), 2);
            assert_eq!(engine.dataset().records(), vec![vec!["b", "2"], vec!["a", "1"]]);
        });
    }

    #[test]
    fn test_session_restore() {
        let dir = TempDir::new().unwrap();
        let data = write_file(&dir, "data.txt", "b----2\na----1\nc----3");

        let service = DataService::open(dir.path(), EngineSettings::default()).unwrap();
        service
            .mutate(|engine| {
                engine.load_files(&[data.clone()]);
                let first = engine.dataset().column_ids()[0];
                engine.add_filter(FilterSpec::new(first, FilterMode::NotContains, "c"));
                engine.set_sort(Some(SortSpec::Column {
                    column: first,
                    ascending: true,
                }))?;
                engine.set_restore_session(true);
                Ok(())
            })
            .unwrap();
        service.save_workspace().unwrap();

        let reopened = DataService::open(dir.path(), EngineSettings::default()).unwrap();
        let view = reopened.read(|engine| {
            let cols = engine.dataset().column_ids();
            engine.view_rows(&cols)
        });
        assert_eq!(view, vec![vec!["a", "1"], vec!["b", "2"]]);
    }

    #[test]
    fn test_open_without_restore_keeps_templates_only() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkspaceState {
            global_filter: "zzz".into(),
            ..Default::default()
        };
        state.save_filter_template(crate::core::FilterTemplate {
            name: "t".into(),
            filters: vec![],
            global: "a".into(),
        });
        state.save_to(dir.path()).unwrap();

        let service = DataService::open(dir.path(), EngineSettings::default()).unwrap();
        service.read(|engine| {
            assert_eq!(engine.global_filter(), "");
            assert_eq!(engine.filter_templates().len(), 1);
        });
    }
}
