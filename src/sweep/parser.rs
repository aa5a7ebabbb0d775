//! Parser for the benchmark tool's per-case text blocks.
//!
//! Each surviving case produces exactly six lines, in submission order and
//! with no separator between cases:
//!
//! ```text
//! qps: 950
//! cpu-util: 87.5
//! mem-r-bw: 1200
//! mem-w-bw: 300
//! latency: best=0.1 worst=0.9 avg=0.3 P99=0.7 P99.9=0.85
//! recall: best=0.99 worst=0.8 avg=0.95 P99=0.85 P99.9=0.82
//! ```
//!
//! There are no per-case delimiters, so block `i` is simply lines
//! `[6i, 6i + 6)`. Any deviation from the grammar is a [`ParseError`].

use crate::error::ParseError;

pub const LINES_PER_CASE: usize = 6;

/// best / worst / avg plus one value per configured percentile, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    pub best: f64,
    pub worst: f64,
    pub avg: f64,
    pub percentiles: Vec<f64>,
}

impl Statistics {
    pub fn values(&self) -> Vec<f64> {
        let mut values = vec![self.best, self.worst, self.avg];
        values.extend_from_slice(&self.percentiles);
        values
    }
}

/// Measurements reported for one case.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkMetrics {
    pub qps: f64,
    pub cpu_util: f64,
    pub mem_r_bw: f64,
    pub mem_w_bw: f64,
    pub latency: Statistics,
    pub recall: Statistics,
}

fn parse_number(raw: &str, line: usize) -> Result<f64, ParseError> {
    raw.parse().map_err(|_| ParseError::InvalidNumber {
        line,
        value: raw.to_string(),
    })
}

fn check_label(token: &str, key: &str, line: usize) -> Result<(), ParseError> {
    if token.strip_suffix(':') == Some(key) {
        Ok(())
    } else {
        Err(ParseError::LabelMismatch {
            line,
            expected: format!("{key}:"),
            found: token.to_string(),
        })
    }
}

/// Parse `<key>: <float>`. `line` is the 1-based line number used in errors.
pub fn parse_value(raw: &str, key: &str, line: usize) -> Result<f64, ParseError> {
    let items: Vec<&str> = raw.split_whitespace().collect();
    if items.len() != 2 {
        return Err(ParseError::TokenCount {
            line,
            expected: 2,
            found: items.len(),
        });
    }
    check_label(items[0], key, line)?;
    parse_number(items[1], line)
}

/// Parse `<key>: best=.. worst=.. avg=.. P<p>=..` with `percentile_count`
/// trailing percentile tokens. Only the value side of each token is used.
pub fn parse_statistics(
    raw: &str,
    key: &str,
    percentile_count: usize,
    line: usize,
) -> Result<Statistics, ParseError> {
    let items: Vec<&str> = raw.split_whitespace().collect();
    let expected = 4 + percentile_count;
    if items.len() != expected {
        return Err(ParseError::TokenCount {
            line,
            expected,
            found: items.len(),
        });
    }
    check_label(items[0], key, line)?;

    let mut values = Vec::with_capacity(expected - 1);
    for item in &items[1..] {
        let (_, value) = item.split_once('=').ok_or_else(|| ParseError::MissingEquals {
            line,
            token: item.to_string(),
        })?;
        values.push(parse_number(value, line)?);
    }

    Ok(Statistics {
        best: values[0],
        worst: values[1],
        avg: values[2],
        percentiles: values[3..].to_vec(),
    })
}

/// Parse one six-line block. `first_line` is the 1-based number of `lines[0]`.
pub fn parse_block(
    lines: &[&str],
    percentile_count: usize,
    first_line: usize,
) -> Result<BenchmarkMetrics, ParseError> {
    if lines.len() != LINES_PER_CASE {
        return Err(ParseError::LineCount {
            cases: 1,
            expected: LINES_PER_CASE,
            found: lines.len(),
        });
    }
    Ok(BenchmarkMetrics {
        qps: parse_value(lines[0], "qps", first_line)?,
        cpu_util: parse_value(lines[1], "cpu-util", first_line + 1)?,
        mem_r_bw: parse_value(lines[2], "mem-r-bw", first_line + 2)?,
        mem_w_bw: parse_value(lines[3], "mem-w-bw", first_line + 3)?,
        latency: parse_statistics(lines[4], "latency", percentile_count, first_line + 4)?,
        recall: parse_statistics(lines[5], "recall", percentile_count, first_line + 5)?,
    })
}

/// Split a whole benchmark stream into `case_count` blocks, in order.
///
/// The stream must hold exactly `6 * case_count` lines; a short or long
/// stream means the correspondence with submitted cases is lost.
pub fn parse_output(
    text: &str,
    case_count: usize,
    percentile_count: usize,
) -> Result<Vec<BenchmarkMetrics>, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let expected = case_count * LINES_PER_CASE;
    if lines.len() != expected {
        return Err(ParseError::LineCount {
            cases: case_count,
            expected,
            found: lines.len(),
        });
    }

    let mut results = Vec::with_capacity(case_count);
    let mut offset = 0;
    for block in lines.chunks(LINES_PER_CASE) {
        results.push(parse_block(block, percentile_count, offset + 1)?);
        offset += LINES_PER_CASE;
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(qps: f64) -> String {
        format!(
            "qps: {qps}\n\
             cpu-util: 87.5\n\
             mem-r-bw: 1200.0\n\
             mem-w-bw: 300.0\n\
             latency: best=0.1 worst=0.9 avg=0.3 P99=0.7 P999=0.85\n\
             recall: best=0.99 worst=0.80 avg=0.95 P99=0.85 P999=0.82\n"
        )
    }

    #[test]
    fn parses_single_block() {
        let parsed = parse_output(&block(950.0), 1, 2).unwrap();
        assert_eq!(
            parsed,
            vec![BenchmarkMetrics {
                qps: 950.0,
                cpu_util: 87.5,
                mem_r_bw: 1200.0,
                mem_w_bw: 300.0,
                latency: Statistics {
                    best: 0.1,
                    worst: 0.9,
                    avg: 0.3,
                    percentiles: vec![0.7, 0.85],
                },
                recall: Statistics {
                    best: 0.99,
                    worst: 0.80,
                    avg: 0.95,
                    percentiles: vec![0.85, 0.82],
                },
            }]
        );
    }

    #[test]
    fn blocks_are_assigned_in_order() {
        let text: String = (1..=3).map(|i| block(f64::from(i) * 100.0)).collect();
        let parsed = parse_output(&text, 3, 2).unwrap();
        let qps: Vec<f64> = parsed.iter().map(|m| m.qps).collect();
        assert_eq!(qps, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn statistics_short_by_one_token_is_fatal() {
        let raw = "latency: best=0.1 worst=0.9 avg=0.3 P99=0.7";
        let err = parse_statistics(raw, "latency", 2, 5).unwrap_err();
        assert_eq!(
            err,
            ParseError::TokenCount {
                line: 5,
                expected: 6,
                found: 5
            }
        );
    }

    #[test]
    fn malformed_line_inside_stream_reports_its_position() {
        let mut text = block(1.0);
        text.push_str(&block(2.0).replace(" P999=0.82", ""));
        let err = parse_output(&text, 2, 2).unwrap_err();
        assert_eq!(
            err,
            ParseError::TokenCount {
                line: 12,
                expected: 6,
                found: 5
            }
        );
    }

    #[test]
    fn label_mismatch_is_fatal() {
        let err = parse_value("throughput: 3.0", "qps", 1).unwrap_err();
        assert!(matches!(err, ParseError::LabelMismatch { line: 1, .. }));

        let err = parse_statistics("recall: best=1 worst=1 avg=1", "latency", 0, 6).unwrap_err();
        assert!(matches!(err, ParseError::LabelMismatch { line: 6, .. }));
    }

    #[test]
    fn scalar_token_count_and_number_checked() {
        assert!(matches!(
            parse_value("qps: 1.0 extra", "qps", 1),
            Err(ParseError::TokenCount { found: 3, .. })
        ));
        assert!(matches!(
            parse_value("qps: fast", "qps", 1),
            Err(ParseError::InvalidNumber { .. })
        ));
        assert!(matches!(
            parse_statistics("latency: best worst=1 avg=1", "latency", 0, 1),
            Err(ParseError::MissingEquals { .. })
        ));
    }

    #[test]
    fn line_count_must_match_cases() {
        let text = block(1.0);
        assert_eq!(
            parse_output(&text, 2, 2).unwrap_err(),
            ParseError::LineCount {
                cases: 2,
                expected: 12,
                found: 6
            }
        );
        assert!(parse_output("", 0, 2).unwrap().is_empty());
    }
}
