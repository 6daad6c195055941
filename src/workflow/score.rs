//! Numeric grade extraction from evaluation reports

use regex::Regex;
use std::sync::OnceLock;

static SCORE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Report summary lines, most specific first
fn score_patterns() -> &'static Vec<Regex> {
    SCORE_PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"\*\*Total Score:\*\*\s*(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)")
                .expect("Invalid bold score pattern"),
            Regex::new(r"Total Score:\s*(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)")
                .expect("Invalid plain score pattern"),
            Regex::new(r"Загальна оцінка:\s*(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)")
                .expect("Invalid Ukrainian score pattern"),
        ]
    })
}

/// Extract the learner's score from a report's `Total Score: a/b` line.
///
/// Returns the numerator rounded to two decimals. A missing line or a zero
/// denominator means the report is ungraded, which is not an error.
pub fn extract_score(report: &str) -> Option<f64> {
    for pattern in score_patterns() {
        let Some(caps) = pattern.captures(report) else {
            continue;
        };
        let (Ok(score), Ok(max)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) else {
            continue;
        };
        if max > 0.0 {
            return Some((score * 100.0).round() / 100.0);
        }
    }
    None
}
