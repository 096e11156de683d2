/// Newline-normalizes `raw` and drops trailing whitespace on every line as well as
/// trailing blank lines.
pub fn normalize_output(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.lines().map(str::trim_end).collect();

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::normalize_output;

    #[test]
    fn strips_trailing_whitespace_and_blank_lines() {
        assert_eq!(normalize_output("even  \n\n\n"), "even");
        assert_eq!(normalize_output("1 2\t\n3 \n"), "1 2\n3");
    }

    #[test]
    fn unifies_line_endings() {
        assert_eq!(normalize_output("a\r\nb\rc\n"), "a\nb\nc");
    }

    #[test]
    fn keeps_leading_whitespace() {
        assert_eq!(normalize_output("  x\n"), "  x");
    }

    #[test]
    fn empty_output_normalizes_to_empty() {
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output(" \n \n"), "");
    }
}
