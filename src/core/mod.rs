pub mod dataset;
pub mod error;
pub mod models;
pub mod parser;
pub mod types;

pub use dataset::{Dataset, Row};
pub use error::{EngineError, Result};
pub use models::*;
pub use types::*;
