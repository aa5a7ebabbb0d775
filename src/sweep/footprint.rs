use crate::error::ParseError;
use crate::sweep::matrix::AlgorithmConfiguration;
use crate::sweep::runner::Engine;
use crate::sweep::schema::TableSchema;
use crate::sweep::store::{algo_predicate, ResultStore};
use anyhow::Result;
use std::path::Path;

/// The size report is a single number on its own.
pub fn parse_footprint(raw: &str) -> Result<f64, ParseError> {
    let items: Vec<&str> = raw.split_whitespace().collect();
    if items.len() != 1 {
        return Err(ParseError::TokenCount {
            line: 1,
            expected: 1,
            found: items.len(),
        });
    }
    items[0].parse().map_err(|_| ParseError::InvalidNumber {
        line: 1,
        value: items[0].to_string(),
    })
}

/// Ask the engine for the index footprint and write it to every row of
/// `config`, whatever its case or sweep-axis values. Returns rows touched.
pub fn update_size<E: Engine>(
    engine: &E,
    store: &ResultStore,
    schema: &TableSchema,
    config: &AlgorithmConfiguration,
    index_path: &Path,
) -> Result<usize> {
    let raw = engine.report_footprint(index_path)?;
    let size = parse_footprint(&raw)?;
    let predicate = algo_predicate(schema, &config.values);
    let touched = store.update_footprint(schema, &predicate, size)?;
    tracing::info!(key = %config.key, size, rows = touched, "recorded index footprint");
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_number() {
        assert_eq!(parse_footprint("4194304\n").unwrap(), 4_194_304.0);
        assert_eq!(parse_footprint("  12.5 ").unwrap(), 12.5);
    }

    #[test]
    fn rejects_anything_else() {
        assert!(matches!(
            parse_footprint(""),
            Err(ParseError::TokenCount { found: 0, .. })
        ));
        assert!(matches!(
            parse_footprint("12 MB"),
            Err(ParseError::TokenCount { found: 2, .. })
        ));
        assert!(matches!(
            parse_footprint("big"),
            Err(ParseError::InvalidNumber { .. })
        ));
    }
}
