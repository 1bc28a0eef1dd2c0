use crate::services::batch_service::{to_full_width, to_half_width};
use jmespath::functions::{ArgumentType, CustomFunction, Signature};
use jmespath::{Context, Rcvar, Runtime, Variable};

/// String argument, falling back to the JSON rendering of a non-string
fn string_arg(args: &[Rcvar], i: usize) -> String {
    args.get(i)
        .map(|v| {
            v.as_string()
                .map(|s| s.to_string())
                .unwrap_or_else(|| v.to_string())
        })
        .unwrap_or_default()
}

/// Register a `fn(string) -> string` under `name`
fn register_string_map(runtime: &mut Runtime, name: &str, f: fn(&str) -> String) {
    runtime.register_function(
        name,
        Box::new(CustomFunction::new(
            Signature::new(vec![ArgumentType::String], None),
            Box::new(move |args: &[Rcvar], _ctx: &mut Context| {
                let s = string_arg(args, 0);
                Ok(Rcvar::new(Variable::String(f(&s))))
            }),
        )),
    );
}

/// Register all custom JMESPath functions available to scripts.
pub fn register_custom_functions(runtime: &mut Runtime) {
    // upper(string) -> string
    register_string_map(runtime, "upper", str::to_uppercase);
    // lower(string) -> string
    register_string_map(runtime, "lower", str::to_lowercase);
    // to_half_width(string) -> string
    register_string_map(runtime, "to_half_width", to_half_width);
    // to_full_width(string) -> string
    register_string_map(runtime, "to_full_width", to_full_width);

    // split_part(string, delimiter, n) -> string
    // 1-based like SQL; negative n counts from the end; out of range gives ''.
    // Example: split_part('a----b----c', '----', `2`) => 'b'
    runtime.register_function(
        "split_part",
        Box::new(CustomFunction::new(
            Signature::new(
                vec![ArgumentType::String, ArgumentType::String, ArgumentType::Number],
                None,
            ),
            Box::new(|args: &[Rcvar], _ctx: &mut Context| {
                let input = string_arg(args, 0);
                let delimiter = string_arg(args, 1);
                let n = args.get(2).and_then(|v| v.as_number()).unwrap_or(0.0) as i64;

                let parts: Vec<&str> = if delimiter.is_empty() {
                    vec![input.as_str()]
                } else {
                    input.split(delimiter.as_str()).collect()
                };
                let index = match n {
                    n if n > 0 => Some(n as usize - 1),
                    n if n < 0 => parts.len().checked_sub(n.unsigned_abs() as usize),
                    _ => None,
                };
                let part = index
                    .and_then(|i| parts.get(i))
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                Ok(Rcvar::new(Variable::String(part)))
            }),
        )),
    );
}
