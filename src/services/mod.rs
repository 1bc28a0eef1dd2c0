pub mod batch_service;
pub mod data_service;
pub mod dedup_service;
pub mod filter_service;
pub mod script_service;
pub mod sort_service;
pub mod view;

pub use batch_service::{BatchOutcome, BatchRequest, BatchService, CleanAction, Operation};
pub use data_service::DataService;
pub use dedup_service::{DedupPlan, DedupPreview, DedupService, GroupReport, KeepPolicy};
pub use filter_service::{FilterOutcome, FilterService};
pub use script_service::{
    FnScript, ScriptConsole, ScriptRun, ScriptScope, ScriptService, ScriptSummary, ScriptTable, TransformScript,
};
pub use sort_service::SortService;
pub use view::ViewIndex;
