use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxRule {
    MissingSelect,
    MissingFrom,
    UnbalancedParentheses,
    UnclosedSingleQuote,
    UnclosedDoubleQuote,
}

impl SyntaxRule {
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::MissingSelect => "Query must include SELECT statement",
            Self::MissingFrom => "Query must include FROM clause",
            Self::UnbalancedParentheses => "Unbalanced parentheses",
            Self::UnclosedSingleQuote => "Unclosed single quote",
            Self::UnclosedDoubleQuote => "Unclosed double quote",
        }
    }
}

impl fmt::Display for SyntaxRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlValidation {
    pub violations: Vec<SyntaxRule>,
}

impl SqlValidation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn message(&self) -> Option<String> {
        if self.is_valid() {
            return None;
        }
        let rules = self
            .violations
            .iter()
            .map(|rule| rule.description())
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("SQL syntax error: {rules}"))
    }
}

#[must_use]
pub fn validate_sql(sql: &str) -> SqlValidation {
    let mut violations = Vec::new();

    if !has_keyword(sql, "SELECT") {
        violations.push(SyntaxRule::MissingSelect);
    }
    if !has_keyword(sql, "FROM") {
        violations.push(SyntaxRule::MissingFrom);
    }
    if !parentheses_balanced(sql) {
        violations.push(SyntaxRule::UnbalancedParentheses);
    }
    if sql.matches('\'').count() % 2 != 0 {
        violations.push(SyntaxRule::UnclosedSingleQuote);
    }
    if sql.matches('"').count() % 2 != 0 {
        violations.push(SyntaxRule::UnclosedDoubleQuote);
    }

    SqlValidation { violations }
}

fn has_keyword(sql: &str, keyword: &str) -> bool {
    sql.split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .any(|token| token.eq_ignore_ascii_case(keyword))
}

fn parentheses_balanced(sql: &str) -> bool {
    let mut depth = 0_usize;
    for ch in sql.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                let Some(next) = depth.checked_sub(1) else {
                    return false;
                };
                depth = next;
            }
            _ => {}
        }
    }
    depth == 0
}
