//! Contract for user-supplied transform scripts.
//!
//! A script receives a JSON copy of the table and returns a replacement table. The
//! engine never looks inside a script; it validates what comes back and only then
//! builds a new dataset from it.
//!
//! Table shape handed to scripts:
//!
//! ```json
//! {"columns": ["name", "qty"], "rows": [["apple", "3"], ["pear", "1"]]}
//! ```
//!
//! Scripts may return the same shape, or an array of flat JSON objects (one per row,
//! columns in first-seen key order).

use crate::core::{Dataset, EngineError, Result, RowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Output captured from a script run, plus its cancellation handle
#[derive(Debug, Clone, Default)]
pub struct ScriptConsole {
    stdout: String,
    stderr: String,
    cancel: CancellationToken,
}

impl ScriptConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Console whose run can be cancelled through `token`
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..Self::default()
        }
    }

    pub fn print(&mut self, line: impl AsRef<str>) {
        self.stdout.push_str(line.as_ref());
        self.stdout.push('\n');
    }

    pub fn eprint(&mut self, line: impl AsRef<str>) {
        self.stderr.push_str(line.as_ref());
        self.stderr.push('\n');
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Scripts doing long work should poll this and bail out early
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A pluggable table transform. The only calling convention is `transform`.
pub trait TransformScript: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, table: Value, console: &mut ScriptConsole) -> anyhow::Result<Value>;
}

/// Script backed by a Rust closure
pub struct FnScript<F> {
    name: String,
    f: F,
}

impl<F> FnScript<F>
where
    F: Fn(Value, &mut ScriptConsole) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> TransformScript for FnScript<F>
where
    F: Fn(Value, &mut ScriptConsole) -> anyhow::Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, table: Value, console: &mut ScriptConsole) -> anyhow::Result<Value> {
        (self.f)(table, console)
    }
}

/// Which rows a script sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ScriptScope {
    #[default]
    Full,
    FilteredView,
}

/// Plain tabular value exchanged with scripts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ScriptTable {
    /// Copy the given rows (all columns, display order)
    pub fn from_dataset(dataset: &Dataset, rows: &[RowId]) -> Self {
        Self {
            columns: dataset.column_names(),
            rows: rows.iter().filter_map(|&id| dataset.row_values(id)).collect(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "columns": self.columns,
            "rows": self.rows,
        })
    }

    /// One JSON object per row. Duplicate column names collapse to the last value.
    pub fn to_records(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object: Map<String, Value> = self
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned().map(Value::String))
                        .collect();
                    Value::Object(object)
                })
                .collect(),
        )
    }

    /// Validate a script's return value.
    ///
    /// An empty record array carries no column names, so `fallback_columns` are used.
    pub fn from_value(value: Value, fallback_columns: &[String]) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Err("script returned nothing".to_string()),
            Value::Object(mut object) if object.contains_key("columns") && object.contains_key("rows") => {
                let columns = match object.remove("columns") {
                    Some(Value::Array(names)) => names
                        .into_iter()
                        .map(|n| match n {
                            Value::String(s) => Ok(s),
                            other => Err(format!("column names must be strings, got {}", kind(&other))),
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?,
                    _ => return Err("\"columns\" must be an array".to_string()),
                };
                let rows = match object.remove("rows") {
                    Some(Value::Array(rows)) => rows,
                    _ => return Err("\"rows\" must be an array".to_string()),
                };

                let mut table = Self {
                    rows: Vec::with_capacity(rows.len()),
                    columns,
                };
                for (i, row) in rows.into_iter().enumerate() {
                    let cells = match row {
                        Value::Array(cells) => cells,
                        other => return Err(format!("row {i} is {}, expected an array", kind(&other))),
                    };
                    if cells.len() > table.columns.len() {
                        return Err(format!(
                            "row {i} has {} cells but there are only {} columns",
                            cells.len(),
                            table.columns.len()
                        ));
                    }
                    let mut values = cells
                        .iter()
                        .map(|c| scalar_to_string(c).ok_or_else(|| format!("row {i} holds a nested {}", kind(c))))
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    values.resize(table.columns.len(), String::new());
                    table.rows.push(values);
                }
                Ok(table)
            }
            Value::Array(records) => {
                if records.is_empty() {
                    return Ok(Self {
                        columns: fallback_columns.to_vec(),
                        rows: Vec::new(),
                    });
                }
                let mut columns: Vec<String> = Vec::new();
                let mut objects = Vec::with_capacity(records.len());
                for (i, record) in records.into_iter().enumerate() {
                    let object = match record {
                        Value::Object(object) => object,
                        other => return Err(format!("record {i} is {}, expected an object", kind(&other))),
                    };
                    for key in object.keys() {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                    objects.push(object);
                }
                let rows = objects
                    .iter()
                    .enumerate()
                    .map(|(i, object)| {
                        columns
                            .iter()
                            .map(|c| match object.get(c) {
                                None => Ok(String::new()),
                                Some(v) => scalar_to_string(v)
                                    .ok_or_else(|| format!("record {i} field {c:?} holds a nested {}", kind(v))),
                            })
                            .collect::<std::result::Result<Vec<_>, _>>()
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Self { columns, rows })
            }
            other => Err(format!("expected a table, got {}", kind(&other))),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "script panicked".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSummary {
    pub row_count_before: usize,
    pub row_count_after: usize,
    pub column_count_before: usize,
    pub column_count_after: usize,
}

/// Result of a script run that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun {
    pub summary: ScriptSummary,
    pub stdout: String,
    pub stderr: String,
    /// False for dry runs
    pub committed: bool,
}

/// Service for running scripts under the table contract
pub struct ScriptService;

impl ScriptService {
    /// Run `script` over `input` and validate its return value.
    ///
    /// Errors, panics, cancellation and malformed returns all surface as
    /// [`EngineError::ScriptExecution`] with whatever the script printed.
    pub fn execute(
        script: &dyn TransformScript,
        input: &ScriptTable,
        console: &mut ScriptConsole,
    ) -> Result<ScriptTable> {
        debug!(
            "Running script {} on {} rows x {} columns",
            script.name(),
            input.rows.len(),
            input.columns.len()
        );

        let value = input.to_value();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| script.transform(value, console)));
        let fail = |console: &ScriptConsole, message: String| {
            warn!(
                "Script {} failed: {} ({} bytes of stderr)",
                script.name(),
                message,
                console.stderr().len()
            );
            EngineError::script(message, console.stdout(), console.stderr())
        };

        let returned = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(fail(console, format!("{e:#}"))),
            Err(payload) => return Err(fail(console, format!("panicked: {}", panic_message(payload)))),
        };
        if console.is_cancelled() {
            return Err(fail(console, "cancelled".to_string()));
        }

        ScriptTable::from_value(returned, &input.columns).map_err(|reason| fail(console, reason))
    }
}
