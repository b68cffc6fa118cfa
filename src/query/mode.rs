//! Expression vs. statement-block detection

use std::sync::LazyLock;

use regex::Regex;

static STATEMENT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u:\b)(const|let|var|if|for|while|return)(?-u:\b)").expect("valid keyword pattern")
});

/// How a query text is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// A single expression; its value is the result.
    Expression,
    /// A function body; the result is whatever it `return`s.
    Statements,
}

impl QueryMode {
    /// Keyword match (or any `;`) selects statement mode. Keywords inside string
    /// literals count too: `findByName('for')` is parsed as statements.
    pub fn detect(query: &str) -> Self {
        let query = query.trim();
        if query.contains(';') || STATEMENT_KEYWORD.is_match(query) {
            QueryMode::Statements
        } else {
            QueryMode::Expression
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_queries() {
        assert_eq!(QueryMode::detect("findByType('TEXT')"), QueryMode::Expression);
        assert_eq!(
            QueryMode::detect("getAllNodes().map(n => n.name).filter(Boolean)"),
            QueryMode::Expression
        );
        // keyword as part of a longer identifier
        assert_eq!(QueryMode::detect("findByName('formats')"), QueryMode::Expression);
        assert_eq!(QueryMode::detect("document.returnValue"), QueryMode::Expression);
    }

    #[test]
    fn test_statement_queries() {
        assert_eq!(QueryMode::detect("const x = 1; return x;"), QueryMode::Statements);
        assert_eq!(QueryMode::detect("if (true) return 1"), QueryMode::Statements);
        assert_eq!(QueryMode::detect("findByType('TEXT');"), QueryMode::Statements);
        assert_eq!(QueryMode::detect("  return 5  "), QueryMode::Statements);
    }

    #[test]
    fn test_keyword_inside_string_selects_statements() {
        assert_eq!(QueryMode::detect("findByName('for')"), QueryMode::Statements);
    }
}
