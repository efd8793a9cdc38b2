//! The `when` expression language.
//!
//! Boolean expressions over context dimensions, used by adjust rules:
//!
//! ```text
//! distro >= fedora-40 and arch == x86_64
//! component == bash or component == coreutils
//! initiator is not defined
//! not (distro ~ rawhide)
//! ```
//!
//! Operator precedence: `not` binds tightest, then comparisons, then `and`,
//! then `or`; parentheses group.  A dimension absent from the context makes
//! every comparison over it evaluate false; existence is tested explicitly
//! with `is defined` / `is not defined`.

use crate::context::{compare_values, Context, ValueOrder};
use crate::error::{Error, Result};
use crate::patterns;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Comparison operators of the `when` language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Match => "~",
            Self::NotMatch => "!~",
        };
        write!(f, "{s}")
    }
}

/// A parsed `when` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Defined(String),
    NotDefined(String),
    Compare {
        dimension: String,
        op: CmpOp,
        literal: String,
    },
}

impl Expr {
    /// Parse an expression, surfacing the offending text on failure.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = lex(input)
            .map_err(|e| Error::syntax(format!("when expression '{input}': {e}")))?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser
            .parse_or()
            .map_err(|e| Error::syntax(format!("when expression '{input}': {e}")))?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::syntax(format!(
                "when expression '{input}': unexpected trailing input"
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a context.
    ///
    /// Comparisons over multi-valued dimensions fire if any value satisfies
    /// the predicate.  Regex errors surface as syntax errors.
    pub fn evaluate(&self, context: &Context) -> Result<bool> {
        match self {
            Self::Or(terms) => {
                for term in terms {
                    if term.evaluate(context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::And(terms) => {
                for term in terms {
                    if !term.evaluate(context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Not(inner) => Ok(!inner.evaluate(context)?),
            Self::Defined(dimension) => Ok(context.is_defined(dimension)),
            Self::NotDefined(dimension) => Ok(!context.is_defined(dimension)),
            Self::Compare {
                dimension,
                op,
                literal,
            } => {
                let Some(values) = context.get(dimension) else {
                    return Ok(false);
                };
                for value in values {
                    if compare_one(value, *op, literal)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn compare_one(value: &str, op: CmpOp, literal: &str) -> Result<bool> {
    let matched = match op {
        CmpOp::Match => return patterns::search(literal, value),
        CmpOp::NotMatch => return Ok(!patterns::search(literal, value)?),
        CmpOp::Eq => compare_values(value, literal) == ValueOrder::Equal,
        CmpOp::Ne => compare_values(value, literal) != ValueOrder::Equal,
        CmpOp::Lt => compare_values(value, literal) == ValueOrder::Less,
        CmpOp::Le => matches!(
            compare_values(value, literal),
            ValueOrder::Less | ValueOrder::Equal
        ),
        CmpOp::Gt => compare_values(value, literal) == ValueOrder::Greater,
        CmpOp::Ge => matches!(
            compare_values(value, literal),
            ValueOrder::Greater | ValueOrder::Equal
        ),
    };
    Ok(matched)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Op(CmpOp),
    LParen,
    RParen,
}

fn lex(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err(format!("unterminated {quote}-quoted string")),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err("single '=' is not an operator, use '=='".to_string());
                }
            }
            '!' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                }
                Some('~') => {
                    tokens.push(Token::Op(CmpOp::NotMatch));
                    i += 2;
                }
                _ => return Err("expected '!=' or '!~'".to_string()),
            },
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '~' => {
                tokens.push(Token::Op(CmpOp::Match));
                i += 1;
            }
            _ => {
                let mut word = String::new();
                while i < chars.len() {
                    let ch = chars[i];
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | '=' | '!' | '<' | '>' | '~' | '\'' | '"') {
                        break;
                    }
                    word.push(ch);
                    i += 1;
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == keyword)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_keyword(&mut self, keyword: &str) -> std::result::Result<(), String> {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{keyword}'"))
        }
    }

    fn parse_or(&mut self) -> std::result::Result<Expr, String> {
        let first = self.parse_and()?;
        if !self.peek_keyword("or") {
            return Ok(first);
        }
        let mut terms = vec![first];
        while self.peek_keyword("or") {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(Expr::Or(terms))
    }

    fn parse_and(&mut self) -> std::result::Result<Expr, String> {
        let first = self.parse_not()?;
        if !self.peek_keyword("and") {
            return Ok(first);
        }
        let mut terms = vec![first];
        while self.peek_keyword("and") {
            self.pos += 1;
            terms.push(self.parse_not()?);
        }
        Ok(Expr::And(terms))
    }

    fn parse_not(&mut self) -> std::result::Result<Expr, String> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> std::result::Result<Expr, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(Token::Word(dimension)) => self.parse_comparison(dimension),
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_comparison(&mut self, dimension: String) -> std::result::Result<Expr, String> {
        // `dimension is defined` / `dimension is not defined`
        if self.peek_keyword("is") {
            self.pos += 1;
            if self.peek_keyword("not") {
                self.pos += 1;
                self.expect_keyword("defined")?;
                return Ok(Expr::NotDefined(dimension));
            }
            self.expect_keyword("defined")?;
            return Ok(Expr::Defined(dimension));
        }

        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            _ => return Err(format!("expected comparison operator after '{dimension}'")),
        };

        let literal = match self.advance() {
            Some(Token::Word(w)) => w,
            Some(Token::Quoted(q)) => q,
            _ => return Err(format!("expected literal after '{dimension} {op}'")),
        };

        Ok(Expr::Compare {
            dimension,
            op,
            literal,
        })
    }
}
