use super::with_runtime;
use crate::services::script_service::{ScriptConsole, ScriptTable, TransformScript};
use anyhow::anyhow;
use serde_json::Value;

/// Transform script written as a JMESPath expression.
///
/// The expression is evaluated against the table as an array of records (one object
/// per row keyed by column name) and must yield an array of objects, or the
/// `{"columns", "rows"}` table shape. JMESPath objects keep their keys sorted, so
/// record results come back with alphabetically ordered columns.
///
/// ```text
/// [?starts_with(name, 'a')].{name: upper(name), qty: qty}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JmesScript {
    expression: String,
}

impl JmesScript {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl TransformScript for JmesScript {
    fn name(&self) -> &str {
        "jmespath"
    }

    fn transform(&self, table: Value, console: &mut ScriptConsole) -> anyhow::Result<Value> {
        let input = ScriptTable::from_value(table, &[]).map_err(|e| anyhow!("bad input table: {e}"))?;
        let records = input.to_records();

        let json_str = with_runtime(|rt| -> anyhow::Result<String> {
            let expr = rt
                .compile(&self.expression)
                .map_err(|e| anyhow!("JMESPath compile error: {e}"))?;
            let var = jmespath::Variable::try_from(records)
                .map_err(|e| anyhow!("Failed to convert table to JMES variable: {e}"))?;
            let result = expr
                .search(&var)
                .map_err(|e| anyhow!("JMESPath search error: {e}"))?;
            Ok(result.to_string())
        })?;

        let value: Value = serde_json::from_str(&json_str)?;
        if let Value::Array(items) = &value {
            console.print(format!(
                "{} -> {} records from {}",
                input.rows.len(),
                items.len(),
                self.expression
            ));
        }
        Ok(value)
    }
}
