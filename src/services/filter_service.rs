//! Filter pipeline: composes [`FilterSpec`]s with AND and yields the passing rows.
//!
//! A spec targeting `ALL` is OR-ed across the cells of a row. Specs that cannot be
//! compiled (bad regex, unknown column) are dropped from the chain and reported back;
//! the remaining specs still apply.

use crate::core::{ColumnId, Dataset, EngineError, FilterColumn, FilterMode, FilterSpec, Row, RowId};
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Row count at which evaluation switches to rayon
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
enum Matcher {
    Text {
        mode: FilterMode,
        needle: String,
        case_insensitive: bool,
    },
    Pattern(Regex),
}

impl Matcher {
    fn is_match(&self, value: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(value),
            Matcher::Text {
                mode,
                needle,
                case_insensitive,
            } => {
                let lowered;
                let value = if *case_insensitive {
                    lowered = value.to_lowercase();
                    lowered.as_str()
                } else {
                    value
                };
                match mode {
                    FilterMode::Contains => value.contains(needle.as_str()),
                    FilterMode::NotContains => !value.contains(needle.as_str()),
                    FilterMode::Equals => value == needle,
                    FilterMode::StartsWith => value.starts_with(needle.as_str()),
                    FilterMode::EndsWith => value.ends_with(needle.as_str()),
                    // compiled into Matcher::Pattern
                    FilterMode::Regex => false,
                }
            }
        }
    }
}

/// A spec that passed validation, ready to test rows
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub index: usize,
    column: FilterColumn,
    matcher: Matcher,
}

impl CompiledFilter {
    fn compile(index: usize, spec: &FilterSpec, dataset: &Dataset) -> Result<Self, EngineError> {
        let reject = |reason: String| EngineError::InvalidFilter {
            index,
            value: spec.value.clone(),
            reason,
        };

        if let FilterColumn::Column(id) = spec.column {
            if dataset.column(id).is_none() {
                return Err(reject(format!("unknown column {id}")));
            }
        }

        let matcher = match spec.mode {
            FilterMode::Regex => {
                let re = RegexBuilder::new(&spec.value)
                    .case_insensitive(spec.case_insensitive)
                    .build()
                    .map_err(|e| reject(e.to_string()))?;
                Matcher::Pattern(re)
            }
            mode => Matcher::Text {
                mode,
                needle: if spec.case_insensitive {
                    spec.value.to_lowercase()
                } else {
                    spec.value.clone()
                },
                case_insensitive: spec.case_insensitive,
            },
        };

        Ok(Self {
            index,
            column: spec.column,
            matcher,
        })
    }

    /// Whether a row passes this filter. `all_columns` is consulted for `ALL` specs.
    pub fn matches(&self, row: &Row, all_columns: &[ColumnId]) -> bool {
        match self.column {
            FilterColumn::Column(id) => self.matcher.is_match(row.get(id)),
            FilterColumn::All => all_columns.iter().any(|&c| self.matcher.is_match(row.get(c))),
        }
    }
}

/// Visible rows plus any specs that were rejected while compiling
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Passing rows in natural dataset order
    pub visible: Vec<RowId>,
    pub rejected: Vec<EngineError>,
}

/// Service for filter evaluation
pub struct FilterService;

impl FilterService {
    /// Compile specs against a dataset's current schema
    pub fn compile(dataset: &Dataset, specs: &[FilterSpec]) -> (Vec<CompiledFilter>, Vec<EngineError>) {
        let mut compiled = Vec::with_capacity(specs.len());
        let mut rejected = Vec::new();
        for (index, spec) in specs.iter().enumerate() {
            match CompiledFilter::compile(index, spec, dataset) {
                Ok(filter) => compiled.push(filter),
                Err(e) => {
                    warn!("Rejected filter {}: {}", spec.summary(), e);
                    rejected.push(e);
                }
            }
        }
        (compiled, rejected)
    }

    pub fn evaluate(dataset: &Dataset, specs: &[FilterSpec]) -> FilterOutcome {
        Self::evaluate_with(dataset, specs, DEFAULT_PARALLEL_THRESHOLD)
    }

    /// Evaluate specs, going parallel once the dataset reaches `parallel_threshold` rows.
    ///
    /// Pure with respect to the dataset; the same inputs always yield the same rows.
    pub fn evaluate_with(dataset: &Dataset, specs: &[FilterSpec], parallel_threshold: usize) -> FilterOutcome {
        let (filters, rejected) = Self::compile(dataset, specs);
        if filters.is_empty() {
            return FilterOutcome {
                visible: dataset.row_ids(),
                rejected,
            };
        }

        let columns = dataset.column_ids();
        let passes = |row: &Row| filters.iter().all(|f| f.matches(row, &columns));

        let visible = if dataset.row_count() >= parallel_threshold {
            dataset
                .rows()
                .par_iter()
                .filter(|row| passes(row))
                .map(|row| row.id())
                .collect()
        } else {
            dataset
                .rows()
                .iter()
                .filter(|row| passes(row))
                .map(|row| row.id())
                .collect()
        };

        FilterOutcome { visible, rejected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dataset() -> Dataset {
        Dataset::parse(
            "Apple----red----10\nbanana----yellow----5\ncherry----Red----7\ndate----brown----",
            "----",
        )
    }

    fn values(ds: &Dataset, ids: &[RowId]) -> Vec<String> {
        let first = ds.column_ids()[0];
        ids.iter()
            .map(|&id| ds.cell(id, first).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_case_insensitive_modes() {
        let ds = dataset();
        let color = ds.column_ids()[1];
        let cases = [
            (FilterMode::Contains, "RED", vec!["Apple", "cherry"]),
            (FilterMode::NotContains, "red", vec!["banana", "date"]),
            (FilterMode::Equals, "red", vec!["Apple", "cherry"]),
            (FilterMode::StartsWith, "BR", vec!["date"]),
            (FilterMode::EndsWith, "LOW", vec!["banana"]),
            (FilterMode::Regex, "^r.d$", vec!["Apple", "cherry"]),
        ];
        for (mode, value, expected) in cases {
            let outcome = FilterService::evaluate(&ds, &[FilterSpec::new(color, mode, value)]);
            assert_eq!(values(&ds, &outcome.visible), expected, "mode {mode}");
        }
    }

    #[test]
    fn test_case_sensitive_match() {
        let ds = dataset();
        let color = ds.column_ids()[1];
        let spec = FilterSpec::new(color, FilterMode::Equals, "Red").case_sensitive();
        let outcome = FilterService::evaluate(&ds, &[spec]);
        assert_eq!(values(&ds, &outcome.visible), vec!["cherry"]);
    }

    #[test]
    fn test_global_spec_ors_across_columns_and_ands_with_others() {
        let ds = dataset();
        let name = ds.column_ids()[0];
        let specs = vec![
            FilterSpec::global("e"),
            FilterSpec::new(name, FilterMode::NotContains, "apple"),
        ];
        let outcome = FilterService::evaluate(&ds, &specs);
        assert_eq!(values(&ds, &outcome.visible), vec!["banana", "cherry", "date"]);
    }

    #[test]
    fn test_invalid_regex_is_rejected_and_others_still_apply() {
        let ds = dataset();
        let name = ds.column_ids()[0];
        let specs = vec![
            FilterSpec::new(name, FilterMode::Regex, "(unclosed"),
            FilterSpec::new(name, FilterMode::StartsWith, "b"),
        ];
        let outcome = FilterService::evaluate(&ds, &specs);
        assert_eq!(values(&ds, &outcome.visible), vec!["banana"]);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(matches!(
            &outcome.rejected[0],
            EngineError::InvalidFilter { index: 0, value, .. } if value == "(unclosed"
        ));
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let ds = dataset();
        let spec = FilterSpec::new(ColumnId::from(42), FilterMode::Contains, "x");
        let outcome = FilterService::evaluate(&ds, &[spec]);
        assert_eq!(outcome.visible.len(), 4);
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[test]
    fn test_contradictory_specs_give_empty_result() {
        let ds = dataset();
        let color = ds.column_ids()[1];
        let specs = vec![
            FilterSpec::new(color, FilterMode::Contains, "red"),
            FilterSpec::new(color, FilterMode::NotContains, "red"),
        ];
        let outcome = FilterService::evaluate(&ds, &specs);
        assert!(outcome.visible.is_empty());
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let text: String = (0..500).map(|i| format!("row{i}----{}\n", i % 7)).collect();
        let ds = Dataset::parse(&text, "----");
        let specs = vec![FilterSpec::new(ds.column_ids()[1], FilterMode::Equals, "3")];
        let sequential = FilterService::evaluate_with(&ds, &specs, usize::MAX);
        let parallel = FilterService::evaluate_with(&ds, &specs, 1);
        assert_eq!(sequential.visible, parallel.visible);
        assert_eq!(sequential.visible.len(), 71);
    }
}
