use crate::domain::Comparator;

use super::normalize_output;

impl Comparator {
    pub fn matches(&self, actual: &str, expected: &str) -> bool {
        let actual = normalize_output(actual);
        let expected = normalize_output(expected);

        match self {
            Comparator::Exact => actual == expected,
            Comparator::FloatTolerance { absolute, relative } => {
                let actual_tokens: Vec<&str> = actual.split_whitespace().collect();
                let expected_tokens: Vec<&str> = expected.split_whitespace().collect();

                actual_tokens.len() == expected_tokens.len()
                    && actual_tokens
                        .iter()
                        .zip(&expected_tokens)
                        .all(|(a, e)| tokens_match(a, e, *absolute, *relative))
            }
            Comparator::UnorderedLines => sorted_lines(&actual) == sorted_lines(&expected),
        }
    }
}

fn tokens_match(actual: &str, expected: &str, absolute: f64, relative: f64) -> bool {
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(e)) => {
            let diff = (a - e).abs();
            diff <= absolute || diff <= relative * a.abs().max(e.abs())
        }
        _ => actual == expected,
    }
}

fn sorted_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().filter(|line| !line.is_empty()).collect();
    lines.sort_unstable();
    lines
}

#[cfg(test)]
mod tests {
    use crate::domain::Comparator;

    #[test]
    fn exact_ignores_trailing_whitespace_only() {
        let exact = Comparator::Exact;
        assert!(exact.matches("even \r\n", "even"));
        assert!(!exact.matches(" even", "even"));
        assert!(!exact.matches("Even", "even"));
    }

    #[test]
    fn float_tolerance_accepts_close_values() {
        let cmp = Comparator::FloatTolerance {
            absolute: 1e-3,
            relative: 0.0,
        };
        assert!(cmp.matches("3.1416 2", "3.14159 2.0000"));
        assert!(!cmp.matches("3.15", "3.14159"));
        assert!(!cmp.matches("1 2", "1 2 3"));
    }

    #[test]
    fn float_tolerance_falls_back_to_text() {
        let cmp = Comparator::FloatTolerance {
            absolute: 1e-6,
            relative: 1e-6,
        };
        assert!(cmp.matches("max=9 min=1", "max=9 min=1"));
        assert!(!cmp.matches("yes", "no"));
    }

    #[test]
    fn float_tolerance_uses_relative_error_for_large_values() {
        let cmp = Comparator::FloatTolerance {
            absolute: 0.0,
            relative: 1e-6,
        };
        assert!(cmp.matches("1000000.5", "1000000"));
        assert!(!cmp.matches("1000010", "1000000"));
    }

    #[test]
    fn unordered_lines_compares_as_multiset() {
        let cmp = Comparator::UnorderedLines;
        assert!(cmp.matches("b\na\nc\n", "a\nb\nc"));
        assert!(!cmp.matches("a\na\nb", "a\nb\nb"));
    }
}
