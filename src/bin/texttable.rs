use clap::{Parser, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use glob::glob;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use texttable::config::Config;
use texttable::core::{ColumnId, Dataset, ExportKind, ExportScope, ExportTemplate, FilterColumn, FilterMode, FilterSpec, SortSpec};
use texttable::engine::TableEngine;
use texttable::export::{ExportTable, kind_for_path};
use texttable::jmes::JmesScript;
use texttable::services::{KeepPolicy, ScriptConsole, ScriptScope};
use tracing::{error, info};

/// Load delimiter-separated text, filter, sort, transform and export it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Field delimiter (defaults to the configured one, `----` out of the box)
    #[arg(long, value_name = "DELIM")]
    delimiter: Option<String>,
    /// Filter the view. Repeatable; filters combine with AND.
    /// COLUMN is a 1-based index, a column name, or ALL.
    /// MODE is one of contains, not_contains, equals, starts_with, ends_with, regex.
    /// Example: --filter '2:regex:^\d+$'
    #[arg(long = "filter", value_name = "COLUMN:MODE:VALUE")]
    filters: Vec<String>,
    /// Case-insensitive text matched against every column
    #[arg(long, value_name = "TEXT")]
    global: Option<String>,
    /// Sort the view by a column, the whole row, or row creation order.
    /// Examples: --sort 2, --sort 2:desc, --sort whole, --sort row:desc
    #[arg(long, value_name = "COLUMN[:desc]")]
    sort: Option<String>,
    /// Remove duplicate rows keyed on the given columns, keeping the first (or last)
    /// Example: --dedup 1,3:last
    #[arg(long, value_name = "COLS[:last]")]
    dedup: Option<String>,
    /// Print a count per distinct key of the given columns instead of the rows
    #[arg(long, value_name = "COLS")]
    group: Option<String>,
    /// Transform the table with a JMESPath expression evaluated against its records
    #[arg(long, value_name = "EXPR")]
    jmes: Option<String>,
    /// Run the transform script but keep the original table
    #[arg(long)]
    dry_run: bool,
    /// Write the result to a file instead of stdout (`.csv` writes CSV, anything else TXT)
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,
    /// Enable file logging at the given level (overrides RUST_LOG)
    #[arg(long = "logging", value_enum)]
    logging: Option<LogLevel>,
    /// Path to a config file (overrides default config discovery)
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Input files or glob patterns; `-` or nothing reads STDIN
    #[arg(value_name = "INPUT")]
    inputs: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    texttable::logging::init_with(None, args.logging.map(Into::into))?;

    let cfg = Config::from_path(args.config.as_ref())?;
    let mut settings = cfg.engine;
    if let Some(delimiter) = &args.delimiter {
        settings.delimiter = delimiter.clone();
    }
    let mut engine = TableEngine::new(settings);
    engine.set_script_folder(cfg.script_folder.as_deref());

    load_inputs(&mut engine, &args.inputs)?;

    if let Some(expression) = &args.jmes {
        let script = JmesScript::new(expression.clone());
        let mut console = ScriptConsole::new();
        let run = engine.run_script(&script, ScriptScope::Full, args.dry_run, &mut console)?;
        eprint!("{}", run.stdout);
        eprintln!(
            "script: rows {} -> {}, columns {} -> {}{}",
            run.summary.row_count_before,
            run.summary.row_count_after,
            run.summary.column_count_before,
            run.summary.column_count_after,
            if run.committed { "" } else { " (dry run, not applied)" }
        );
    }

    if let Some(spec) = &args.dedup {
        let (columns, keep) = parse_dedup(engine.dataset(), spec)?;
        let plan = engine.dedup(&columns, keep)?;
        eprintln!("dedup: removed {} rows", plan.removed_count());
    }

    let filters = args
        .filters
        .iter()
        .map(|raw| parse_filter(engine.dataset(), raw))
        .collect::<Result<Vec<_>>>()?;
    for rejected in engine.set_filters(filters) {
        eprintln!("warning: {rejected}");
    }
    if let Some(text) = &args.global {
        engine.set_global_filter(text.clone());
    }
    if let Some(spec) = &args.sort {
        let sort = parse_sort(engine.dataset(), spec)?;
        engine.set_sort(Some(sort))?;
    }

    let delimiter = engine.delimiter().to_string();
    let (table, with_header) = match &args.group {
        Some(spec) => {
            let columns = parse_columns(engine.dataset(), spec)?;
            (ExportTable::from_group(&engine.group_view(&columns)?), true)
        }
        None => {
            let template = ExportTemplate {
                name: "cli".into(),
                export_kind: ExportKind::Txt,
                column_order: Vec::new(),
                delimiter: delimiter.clone(),
                scope: ExportScope::View,
            };
            (ExportTable::from_template(&engine, &template, &[])?, false)
        }
    };

    match &args.export {
        Some(path) => {
            table.write_to_path(path, kind_for_path(path), &delimiter)?;
            eprintln!("exported {} rows to {}", table.rows.len(), path.display());
        }
        None => {
            let mut out = io::stdout().lock();
            if with_header {
                writeln!(out, "{}", table.header.join(&delimiter))?;
            }
            table.write_txt(&mut out, &delimiter)?;
        }
    }
    info!("Done: {} rows written", table.rows.len());
    Ok(())
}

fn load_inputs(engine: &mut TableEngine, inputs: &[String]) -> Result<()> {
    if inputs.is_empty() || inputs.iter().any(|i| i == "-") {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        let decoded = texttable::core::parser::decode_bytes(&buf);
        if decoded.had_errors {
            eprintln!("warning: STDIN is not valid UTF-8 or GB18030, some characters were replaced");
        }
        engine.load_text(&decoded.text);
    }

    let mut paths = Vec::new();
    for input in inputs.iter().filter(|i| *i != "-") {
        paths.extend(expand_input(input)?);
    }
    if paths.is_empty() {
        return Ok(());
    }
    let report = engine.load_files(&paths);
    for (path, reason) in &report.skipped {
        eprintln!("warning: skipped {}: {}", path.display(), reason);
    }
    for path in &report.lossy {
        eprintln!("warning: {} may be mis-decoded", path.display());
    }
    Ok(())
}

fn expand_input(input: &str) -> Result<Vec<PathBuf>> {
    let has_wildcards = input.contains('*') || input.contains('?') || input.contains('[');
    if !has_wildcards {
        return Ok(vec![PathBuf::from(input)]);
    }
    let mut out = Vec::new();
    for entry in glob(input).map_err(|e| eyre!("Invalid glob pattern '{input}': {e}"))? {
        match entry {
            Ok(p) => out.push(p),
            Err(e) => error!("Glob error on '{input}': {e}"),
        }
    }
    if out.is_empty() {
        // Nothing matched: keep it literal so the load reports the missing file
        Ok(vec![PathBuf::from(input)])
    } else {
        out.sort();
        Ok(out)
    }
}

/// A 1-based column index or a column display name
fn parse_column(dataset: &Dataset, raw: &str) -> Result<ColumnId> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| dataset.column_at(i))
            .ok_or_else(|| eyre!("No column {n} (table has {} columns)", dataset.column_count()));
    }
    dataset
        .column_by_name(raw)
        .ok_or_else(|| eyre!("No column named '{raw}'"))
}

fn parse_columns(dataset: &Dataset, raw: &str) -> Result<Vec<ColumnId>> {
    raw.split(',').map(|c| parse_column(dataset, c)).collect()
}

fn parse_filter(dataset: &Dataset, raw: &str) -> Result<FilterSpec> {
    let mut parts = raw.splitn(3, ':');
    let (Some(column), Some(mode), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(eyre!("Filter '{raw}' is not COLUMN:MODE:VALUE"));
    };
    let mode = FilterMode::from_str(mode.trim()).map_err(|_| eyre!("Unknown filter mode '{mode}'"))?;
    let column = if column.trim().eq_ignore_ascii_case("all") {
        FilterColumn::All
    } else {
        FilterColumn::Column(parse_column(dataset, column)?)
    };
    Ok(FilterSpec {
        column,
        mode,
        value: value.to_string(),
        case_insensitive: true,
    })
}

fn parse_sort(dataset: &Dataset, raw: &str) -> Result<SortSpec> {
    let (target, ascending) = match raw.rsplit_once(':') {
        Some((target, dir)) if dir.eq_ignore_ascii_case("desc") => (target, false),
        Some((target, dir)) if dir.eq_ignore_ascii_case("asc") => (target, true),
        _ => (raw, true),
    };
    Ok(match target.trim().to_ascii_lowercase().as_str() {
        "row" => SortSpec::RowId { ascending },
        "whole" => SortSpec::WholeRow { ascending },
        _ => SortSpec::Column {
            column: parse_column(dataset, target)?,
            ascending,
        },
    })
}

fn parse_dedup(dataset: &Dataset, raw: &str) -> Result<(Vec<ColumnId>, KeepPolicy)> {
    let (columns, keep) = match raw.rsplit_once(':') {
        Some((columns, "last")) => (columns, KeepPolicy::Last),
        Some((columns, "first")) => (columns, KeepPolicy::First),
        _ => (raw, KeepPolicy::First),
    };
    Ok((parse_columns(dataset, columns)?, keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dataset() -> Dataset {
        let mut ds = Dataset::parse("a----1----x", "----");
        ds.rename_column(ds.column_ids()[2], "tag").unwrap();
        ds
    }

    #[test]
    fn test_parse_filter() {
        let ds = dataset();
        let spec = parse_filter(&ds, "2:regex:^\\d:+$").unwrap();
        assert_eq!(spec.column, FilterColumn::Column(ds.column_ids()[1]));
        assert_eq!(spec.mode, FilterMode::Regex);
        assert_eq!(spec.value, "^\\d:+$");

        assert_eq!(parse_filter(&ds, "all:contains:a").unwrap(), FilterSpec::global("a"));
        assert!(parse_filter(&ds, "1:between:a").is_err());
        assert!(parse_filter(&ds, "9:contains:a").is_err());
        assert!(parse_filter(&ds, "1contains").is_err());
    }

    #[test]
    fn test_parse_sort_and_dedup() {
        let ds = dataset();
        let ids = ds.column_ids();
        assert_eq!(parse_sort(&ds, "row:desc").unwrap(), SortSpec::RowId { ascending: false });
        assert_eq!(parse_sort(&ds, "whole").unwrap(), SortSpec::WholeRow { ascending: true });
        assert_eq!(
            parse_sort(&ds, "tag:desc").unwrap(),
            SortSpec::Column {
                column: ids[2],
                ascending: false
            }
        );
        assert_eq!(parse_dedup(&ds, "1,3:last").unwrap(), (vec![ids[0], ids[2]], KeepPolicy::Last));
        assert_eq!(parse_dedup(&ds, "2").unwrap(), (vec![ids[1]], KeepPolicy::First));
    }

    #[test]
    fn test_literal_input_without_wildcards() {
        assert_eq!(expand_input("data.txt").unwrap(), vec![PathBuf::from("data.txt")]);
    }
}
