//! JMESPath transform scripts over a table
//!
//! `JmesScript` evaluates an expression against the table's records, one object per
//! row keyed by column name. On top of the JMESPath built-ins, expressions can call
//! `upper`, `lower`, `split_part` and the half/full width conversions.

mod functions;
mod runtime;
mod script;

pub use functions::register_custom_functions;
pub use runtime::with_runtime;
pub use script::JmesScript;

/// Runtime with the built-ins and the table string helpers registered
pub fn new_runtime() -> jmespath::Runtime {
    let mut rt = jmespath::Runtime::new();
    rt.register_builtin_functions();
    register_custom_functions(&mut rt);
    rt
}
