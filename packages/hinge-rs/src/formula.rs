//! Boolean formula compiler for logical aggregator doors.
//!
//! A formula combines declared variable names with `!`, `&`, `^`, `|` and
//! parentheses. Precedence, from tightest to loosest:
//!
//! ```text
//! !   negation
//! &   and
//! ^   exclusive or
//! |   or
//! ```
//!
//! Binary operators are left-associative. Compilation is pure: it validates
//! the text against the declared variables and produces an [`Evaluator`]
//! that callers cache alongside their door definition.
//!
//! # Completeness check
//!
//! A declared variable counts as "used" when the formula text contains it,
//! compared case-insensitively as a substring. This is a textual check, not
//! free-variable analysis: `AB & C` satisfies a declared `A`. Existing door
//! configurations rely on that permissive rule, so it stays.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator used by the builder's single-operator convenience formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicOperator {
    And,
    Or,
    ExclusiveOr,
}

impl LogicOperator {
    pub fn symbol(self) -> char {
        match self {
            LogicOperator::And => '&',
            LogicOperator::Or => '|',
            LogicOperator::ExclusiveOr => '^',
        }
    }

    /// Join `variables` with this operator (`A & B & C`).
    pub fn join<S: AsRef<str>>(self, variables: &[S]) -> String {
        let separator = format!(" {} ", self.symbol());
        variables
            .iter()
            .map(|v| v.as_ref())
            .collect::<Vec<_>>()
            .join(&separator)
    }
}

impl fmt::Display for LogicOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Why a formula failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("formula is empty")]
    EmptyFormula,

    #[error("formula '{formula}' contains invalid characters: {}", quote_chars(.invalid))]
    InvalidFormulaCharacters { formula: String, invalid: Vec<char> },

    #[error("formula '{formula}' does not reference declared variable(s): {}", .missing.join(", "))]
    VariableMissingFromFormula {
        formula: String,
        missing: Vec<String>,
    },

    #[error("formula '{formula}' references undeclared variable '{variable}' at position {position}")]
    UnknownVariable {
        formula: String,
        variable: String,
        position: usize,
    },

    #[error("unexpected '{token}' at position {position} in formula '{formula}'")]
    UnexpectedToken {
        formula: String,
        token: String,
        position: usize,
    },

    #[error("unbalanced parenthesis at position {position} in formula '{formula}'")]
    UnbalancedParenthesis { formula: String, position: usize },

    #[error("formula '{formula}' ends unexpectedly")]
    UnexpectedEnd { formula: String },

    #[error("formula '{formula}' nests deeper than {limit} levels at position {position}")]
    NestingTooDeep {
        formula: String,
        position: usize,
        limit: usize,
    },
}

fn quote_chars(chars: &[char]) -> String {
    chars
        .iter()
        .map(|c| format!("'{}'", c))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Tokens
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Not,
    And,
    Xor,
    Or,
    Open,
    Close,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "{}", name),
            TokenKind::Not => write!(f, "!"),
            TokenKind::And => write!(f, "&"),
            TokenKind::Xor => write!(f, "^"),
            TokenKind::Or => write!(f, "|"),
            TokenKind::Open => write!(f, "("),
            TokenKind::Close => write!(f, ")"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_allowed_char(c: char) -> bool {
    is_identifier_char(c) || c.is_whitespace() || matches!(c, '!' | '&' | '|' | '^' | '(' | ')')
}

fn tokenize(formula: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = formula.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        let kind = match c {
            '!' => TokenKind::Not,
            '&' => TokenKind::And,
            '^' => TokenKind::Xor,
            '|' => TokenKind::Or,
            '(' => TokenKind::Open,
            ')' => TokenKind::Close,
            c if c.is_whitespace() => continue,
            c => {
                let mut name = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if !is_identifier_char(next) {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                TokenKind::Ident(name)
            }
        };
        tokens.push(Token { kind, position });
    }

    tokens
}

// =============================================================================
// Syntax tree
// =============================================================================

/// Deepest `!` / parenthesis nesting a formula may use.
pub const MAX_FORMULA_NESTING: usize = 64;

/// Operator chains are n-ary so that long `A & B & ...` formulas stay flat.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Var(usize),
    Not(Box<Node>),
    And(Vec<Node>),
    Xor(Vec<Node>),
    Or(Vec<Node>),
}

impl Node {
    fn eval(&self, values: &[bool]) -> bool {
        match self {
            Node::Var(idx) => values.get(*idx).copied().unwrap_or(false),
            Node::Not(inner) => !inner.eval(values),
            Node::And(operands) => operands.iter().all(|n| n.eval(values)),
            Node::Xor(operands) => operands.iter().fold(false, |acc, n| acc ^ n.eval(values)),
            Node::Or(operands) => operands.iter().any(|n| n.eval(values)),
        }
    }

    fn chain(mut operands: Vec<Node>, build: fn(Vec<Node>) -> Node) -> Node {
        if operands.len() == 1 {
            if let Some(only) = operands.pop() {
                return only;
            }
        }
        build(operands)
    }
}

struct Parser<'a> {
    formula: &'a str,
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
    variables: &'a [String],
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        self.cursor += 1;
        token
    }

    fn unexpected(&self, token: &Token) -> FormulaError {
        FormulaError::UnexpectedToken {
            formula: self.formula.to_string(),
            token: token.kind.to_string(),
            position: token.position,
        }
    }

    fn parse(mut self) -> Result<Node, FormulaError> {
        let root = self.parse_or()?;
        match self.peek() {
            None => Ok(root),
            Some(token) if token.kind == TokenKind::Close => Err(FormulaError::UnbalancedParenthesis {
                formula: self.formula.to_string(),
                position: token.position,
            }),
            Some(token) => Err(self.unexpected(token)),
        }
    }

    fn parse_or(&mut self) -> Result<Node, FormulaError> {
        let mut operands = vec![self.parse_xor()?];
        while matches!(self.peek(), Some(t) if t.kind == TokenKind::Or) {
            self.advance();
            operands.push(self.parse_xor()?);
        }
        Ok(Node::chain(operands, Node::Or))
    }

    fn parse_xor(&mut self) -> Result<Node, FormulaError> {
        let mut operands = vec![self.parse_and()?];
        while matches!(self.peek(), Some(t) if t.kind == TokenKind::Xor) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        Ok(Node::chain(operands, Node::Xor))
    }

    fn parse_and(&mut self) -> Result<Node, FormulaError> {
        let mut operands = vec![self.parse_unary()?];
        while matches!(self.peek(), Some(t) if t.kind == TokenKind::And) {
            self.advance();
            operands.push(self.parse_unary()?);
        }
        Ok(Node::chain(operands, Node::And))
    }

    /// Enter one `!` or `(` level.
    fn descend(&mut self, position: usize) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_FORMULA_NESTING {
            return Err(FormulaError::NestingTooDeep {
                formula: self.formula.to_string(),
                position,
                limit: MAX_FORMULA_NESTING,
            });
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<Node, FormulaError> {
        if let Some(position) = self
            .peek()
            .filter(|t| t.kind == TokenKind::Not)
            .map(|t| t.position)
        {
            self.advance();
            self.descend(position)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, FormulaError> {
        let token = self.advance().ok_or_else(|| FormulaError::UnexpectedEnd {
            formula: self.formula.to_string(),
        })?;

        match &token.kind {
            TokenKind::Ident(name) => {
                let idx = self
                    .variables
                    .iter()
                    .position(|v| v == name)
                    .ok_or_else(|| FormulaError::UnknownVariable {
                        formula: self.formula.to_string(),
                        variable: name.clone(),
                        position: token.position,
                    })?;
                Ok(Node::Var(idx))
            }
            TokenKind::Open => {
                self.descend(token.position)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(close) if close.kind == TokenKind::Close => Ok(inner),
                    Some(other) => Err(self.unexpected(&other)),
                    None => Err(FormulaError::UnbalancedParenthesis {
                        formula: self.formula.to_string(),
                        position: token.position,
                    }),
                }
            }
            _ => Err(self.unexpected(&token)),
        }
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// A compiled formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluator {
    formula: String,
    variables: Vec<String>,
    root: Node,
}

impl Evaluator {
    /// The formula text this evaluator was compiled from.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Declared variables, in the order used by [`Evaluator::evaluate_indexed`].
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Evaluate against a name → value assignment. Missing names are false.
    pub fn evaluate(&self, assignment: &HashMap<String, bool>) -> bool {
        let values: Vec<bool> = self
            .variables
            .iter()
            .map(|v| assignment.get(v).copied().unwrap_or(false))
            .collect();
        self.root.eval(&values)
    }

    /// Evaluate against values aligned with [`Evaluator::variables`].
    pub fn evaluate_indexed(&self, values: &[bool]) -> bool {
        self.root.eval(values)
    }
}

/// Compile `formula` over the `declared` variable names.
pub fn compile<I, S>(formula: &str, declared: I) -> Result<Evaluator, FormulaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut variables: Vec<String> = Vec::new();
    for name in declared {
        let name = name.as_ref();
        if !variables.iter().any(|v| v == name) {
            variables.push(name.to_string());
        }
    }

    if formula.trim().is_empty() {
        return Err(FormulaError::EmptyFormula);
    }

    let invalid: BTreeSet<char> = formula.chars().filter(|c| !is_allowed_char(*c)).collect();
    if !invalid.is_empty() {
        return Err(FormulaError::InvalidFormulaCharacters {
            formula: formula.to_string(),
            invalid: invalid.into_iter().collect(),
        });
    }

    let lowered = formula.to_lowercase();
    let missing: Vec<String> = variables
        .iter()
        .filter(|v| !lowered.contains(&v.to_lowercase()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(FormulaError::VariableMissingFromFormula {
            formula: formula.to_string(),
            missing,
        });
    }

    let root = Parser {
        formula,
        tokens: tokenize(formula),
        cursor: 0,
        depth: 0,
        variables: &variables,
    }
    .parse()?;

    Ok(Evaluator {
        formula: formula.to_string(),
        variables,
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// Check the evaluator against `reference` over every assignment.
    fn check_all_assignments(formula: &str, vars: &[&str], reference: impl Fn(&[bool]) -> bool) {
        let evaluator = compile(formula, vars).unwrap();
        for mask in 0..(1u32 << vars.len()) {
            let values: Vec<bool> = (0..vars.len()).map(|i| mask & (1 << i) != 0).collect();
            let named: HashMap<String, bool> = vars
                .iter()
                .zip(values.iter())
                .map(|(k, v)| (k.to_string(), *v))
                .collect();

            assert_eq!(
                evaluator.evaluate(&named),
                reference(&values),
                "formula '{}' disagrees for {:?}",
                formula,
                named
            );
            assert_eq!(evaluator.evaluate_indexed(&values), reference(&values));
        }
    }

    #[test]
    fn test_simple_operators() {
        check_all_assignments("A      &B   ", &["A", "B"], |v| v[0] && v[1]);
        check_all_assignments("A      |B   ", &["A", "B"], |v| v[0] || v[1]);
        check_all_assignments("A ^ B", &["A", "B"], |v| v[0] ^ v[1]);
        check_all_assignments("A      &!B   ", &["A", "B"], |v| v[0] && !v[1]);
        check_all_assignments("!A      &B   ", &["A", "B"], |v| !v[0] && v[1]);
    }

    #[test]
    fn test_precedence_not_and_xor_or() {
        // ! > & > ^ > |
        check_all_assignments("A ^ B & C | !D", &["A", "B", "C", "D"], |v| {
            (v[0] ^ (v[1] && v[2])) || !v[3]
        });
        check_all_assignments("A | B ^ C", &["A", "B", "C"], |v| v[0] || (v[1] ^ v[2]));
        check_all_assignments("!A & B | C & D", &["A", "B", "C", "D"], |v| {
            (!v[0] && v[1]) || (v[2] && v[3])
        });
    }

    #[test]
    fn test_parentheses_override_precedence() {
        check_all_assignments("(A      &B   )&    C", &["A", "B", "C"], |v| v[0] && v[1] && v[2]);
        check_all_assignments("(A | B) & C", &["A", "B", "C"], |v| (v[0] || v[1]) && v[2]);
        check_all_assignments("!(A ^ B) ^ (C | D)", &["A", "B", "C", "D"], |v| {
            !(v[0] ^ v[1]) ^ (v[2] || v[3])
        });
    }

    #[test]
    fn test_left_associativity() {
        check_all_assignments("A ^ B ^ C", &["A", "B", "C"], |v| (v[0] ^ v[1]) ^ v[2]);
        check_all_assignments("!!A", &["A"], |v| v[0]);
    }

    #[test]
    fn test_multi_letter_variables() {
        check_all_assignments("ready & !this", &["ready", "this"], |v| v[0] && !v[1]);
        check_all_assignments("price_up | volume_2", &["price_up", "volume_2"], |v| v[0] || v[1]);
    }

    #[test]
    fn test_missing_assignment_is_false() {
        let evaluator = compile("A | !B", ["A", "B"]).unwrap();
        assert!(evaluator.evaluate(&assignment(&[])));
        assert!(!evaluator.evaluate(&assignment(&[("B", true)])));
    }

    #[test]
    fn test_invalid_characters_rejected() {
        let err = compile("A + B", ["A", "B"]).unwrap_err();
        assert_eq!(
            err,
            FormulaError::InvalidFormulaCharacters {
                formula: "A + B".into(),
                invalid: vec!['+'],
            }
        );
        assert!(err.to_string().contains("'+'"));
    }

    #[test]
    fn test_invalid_characters_reported_once_each() {
        let err = compile("A+B+C-A", ["A", "B", "C"]).unwrap_err();
        assert_eq!(
            err,
            FormulaError::InvalidFormulaCharacters {
                formula: "A+B+C-A".into(),
                invalid: vec!['+', '-'],
            }
        );
    }

    #[test]
    fn test_nesting_is_capped() {
        let negations = format!("{}A", "!".repeat(10_000));
        assert!(matches!(
            compile(&negations, ["A"]).unwrap_err(),
            FormulaError::NestingTooDeep { limit: MAX_FORMULA_NESTING, .. }
        ));

        let parens = format!("{}A{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(
            compile(&parens, ["A"]).unwrap_err(),
            FormulaError::NestingTooDeep { .. }
        ));

        let at_limit = format!(
            "{}A{}",
            "(".repeat(MAX_FORMULA_NESTING),
            ")".repeat(MAX_FORMULA_NESTING)
        );
        assert!(compile(&at_limit, ["A"]).is_ok());
    }

    #[test]
    fn test_long_chains_stay_flat() {
        let names: Vec<String> = (0..5_000).map(|i| format!("v{i}")).collect();
        let evaluator = compile(&LogicOperator::And.join(&names), &names).unwrap();
        assert!(evaluator.evaluate_indexed(&vec![true; names.len()]));
        assert!(!evaluator.evaluate_indexed(&vec![false; names.len()]));
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let err = compile("A & Z", ["A"]).unwrap_err();
        match err {
            FormulaError::UnknownVariable {
                variable, position, ..
            } => {
                assert_eq!(variable, "Z");
                assert_eq!(position, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_declared_variable_missing_from_formula() {
        let err = compile("A & B", ["A", "B", "C"]).unwrap_err();
        assert_eq!(
            err,
            FormulaError::VariableMissingFromFormula {
                formula: "A & B".into(),
                missing: vec!["C".into()],
            }
        );
    }

    #[test]
    fn test_completeness_is_loose_substring_check() {
        // "A" is contained in "AB", so declaring A without using it passes.
        let evaluator = compile("AB", ["A", "AB"]).unwrap();
        assert!(evaluator.evaluate(&assignment(&[("AB", true)])));
        assert!(!evaluator.evaluate(&assignment(&[("A", true)])));

        // Containment ignores case, the parser does not.
        assert!(matches!(
            compile("a", ["A"]).unwrap_err(),
            FormulaError::UnknownVariable { .. }
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(compile("   ", ["A"]).unwrap_err(), FormulaError::EmptyFormula);

        assert!(matches!(
            compile("(A & B", ["A", "B"]).unwrap_err(),
            FormulaError::UnbalancedParenthesis { position: 0, .. }
        ));
        assert!(matches!(
            compile("A & B)", ["A", "B"]).unwrap_err(),
            FormulaError::UnbalancedParenthesis { position: 5, .. }
        ));
        assert!(matches!(
            compile("A & ", ["A"]).unwrap_err(),
            FormulaError::UnexpectedEnd { .. }
        ));
        assert!(matches!(
            compile("A B", ["A", "B"]).unwrap_err(),
            FormulaError::UnexpectedToken { position: 2, .. }
        ));
        assert!(matches!(
            compile("A & | B", ["A", "B"]).unwrap_err(),
            FormulaError::UnexpectedToken { .. }
        ));
    }

    #[test]
    fn test_logic_operator_join() {
        assert_eq!(LogicOperator::And.join(&["A", "B", "C"]), "A & B & C");
        assert_eq!(LogicOperator::Or.join(&["A", "B"]), "A | B");
        assert_eq!(LogicOperator::ExclusiveOr.join(&["A"]), "A");
    }

    #[test]
    fn test_duplicate_declarations_collapse() {
        let evaluator = compile("A & B", ["A", "B", "A"]).unwrap();
        assert_eq!(evaluator.variables(), &["A".to_string(), "B".to_string()]);
    }
}
