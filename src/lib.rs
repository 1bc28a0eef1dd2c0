#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_match)]
#![allow(clippy::collapsible_else_if)]

pub mod config;
pub mod core;
pub mod engine;
pub mod export;
pub mod jmes;
pub mod logging;
pub mod services;
pub mod workspace;

// Re-export commonly used types
pub use core::{ColumnId, Dataset, EngineError, FilterSpec, RowId, SortSpec};
pub use engine::{EngineSettings, TableEngine};
pub use services::DataService;
pub use workspace::WorkspaceState;
