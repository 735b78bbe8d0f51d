/// Strips control characters from user-supplied text before validation,
/// so they can't poison logs or the shared store.
pub struct Sanitizer {
    max_len: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self { max_len: 100_000 }
    }
}

impl Sanitizer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Sanitize a string: strip control characters, enforce a byte limit.
    pub fn sanitize(&self, input: &str) -> SanitizeResult {
        if input.len() > self.max_len {
            return SanitizeResult::Rejected("Input exceeds maximum length".to_string());
        }

        let cleaned: String = input
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();

        if cleaned.is_empty() && !input.is_empty() {
            return SanitizeResult::Rejected("Input contains only control characters".to_string());
        }

        if cleaned != input {
            SanitizeResult::Cleaned(cleaned)
        } else {
            SanitizeResult::Clean(cleaned)
        }
    }

    /// Single-line variant for titles: control characters are stripped and
    /// every run of whitespace, line breaks included, becomes one space.
    pub fn sanitize_line(&self, input: &str) -> SanitizeResult {
        let stripped = match self.sanitize(input) {
            SanitizeResult::Clean(s) | SanitizeResult::Cleaned(s) => s,
            rejected => return rejected,
        };
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed == input {
            SanitizeResult::Clean(collapsed)
        } else {
            SanitizeResult::Cleaned(collapsed)
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum SanitizeResult {
    /// Input was already clean.
    Clean(String),
    /// Input was cleaned (control characters removed).
    Cleaned(String),
    /// Input was rejected entirely.
    Rejected(String),
}

impl SanitizeResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, SanitizeResult::Rejected(_))
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            SanitizeResult::Clean(s) | SanitizeResult::Cleaned(s) => Some(s),
            SanitizeResult::Rejected(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_input() {
        let s = Sanitizer::default();
        assert!(matches!(s.sanitize("Hello world\nNew line"), SanitizeResult::Clean(_)));
    }

    #[test]
    fn test_control_chars_stripped() {
        let s = Sanitizer::default();
        let result = s.sanitize("Need\x00\x1b a ladder");
        assert_eq!(result, SanitizeResult::Cleaned("Need a ladder".to_string()));
    }

    #[test]
    fn test_length_rejection() {
        let s = Sanitizer::new(10);
        assert!(s.sanitize("This is too long for the limit").is_rejected());
    }

    #[test]
    fn test_only_control_chars_rejected() {
        let s = Sanitizer::default();
        assert!(s.sanitize("\x01\x02").is_rejected());
    }

    #[test]
    fn test_sanitize_line_flattens() {
        let s = Sanitizer::default();
        assert_eq!(
            s.sanitize_line("two\nlines"),
            SanitizeResult::Cleaned("two lines".to_string())
        );
        assert_eq!(
            s.sanitize_line("one line"),
            SanitizeResult::Clean("one line".to_string())
        );
    }

    #[test]
    fn test_sanitize_line_collapses_whitespace() {
        let s = Sanitizer::default();
        assert_eq!(
            s.sanitize_line("  Fix\x07 bike \r\n\t chain "),
            SanitizeResult::Cleaned("Fix bike chain".to_string())
        );
        assert!(s.sanitize_line("\x01\x02").is_rejected());
        assert_eq!(s.sanitize_line("   "), SanitizeResult::Cleaned(String::new()));
    }
}
