//! Rule text parser.
//!
//! Grammar (keywords are case-insensitive, NOT binds tighter than AND,
//! AND binds tighter than OR):
//!
//! ```text
//! rule       := or_expr EOF
//! or_expr    := and_expr ( "OR" and_expr )*
//! and_expr   := unary ( "AND" unary )*
//! unary      := "NOT" unary | primary
//! primary    := "(" or_expr ")" | comparison
//! comparison := FIELD OP LITERAL
//! ```

use campaign_core::types::CustomerStatus;
use campaign_core::ParseError;

use crate::predicates::{Comparison, ComparisonOperator, Field, FieldKind, Literal, SegmentRule};

/// Maximum height of a rule tree, and maximum nesting of parentheses and
/// NOT prefixes. Every AND/OR in a chain adds a level, so this also caps
/// how many clauses one chain may join.
pub const MAX_DEPTH: usize = 128;

const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!'];

/// Parse rule text into a [`SegmentRule`]. Fails on the first problem found;
/// there is no partial result.
pub fn parse(text: &str) -> Result<SegmentRule, ParseError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let (rule, _) = parser.or_expr()?;
    if let Some(extra) = parser.peek() {
        return Err(extra.unexpected());
    }
    Ok(rule)
}

// ─── Lexer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Word,
    Number(f64),
    Text(String),
    Operator,
    LParen,
    RParen,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    /// Raw source slice, used in error messages.
    text: String,
    position: usize,
}

impl Token {
    fn unexpected(&self) -> ParseError {
        ParseError::UnexpectedToken {
            token: self.text.clone(),
            position: self.position,
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            '"' | '\'' => {
                chars.next();
                TokenKind::Text(read_string(&mut chars, c, start)?)
            }
            c if OPERATOR_CHARS.contains(&c) => {
                while chars.next_if(|&(_, c)| OPERATOR_CHARS.contains(&c)).is_some() {}
                TokenKind::Operator
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                chars.next();
                while chars
                    .next_if(|&(_, c)| c.is_ascii_digit() || c == '.')
                    .is_some()
                {}
                let end = chars.peek().map_or(text.len(), |&(i, _)| i);
                let raw = &text[start..end];
                let value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ParseError::UnexpectedToken {
                        token: raw.to_string(),
                        position: start,
                    })?;
                TokenKind::Number(value)
            }
            c if c.is_alphabetic() || c == '_' => {
                while chars
                    .next_if(|&(_, c)| c.is_alphanumeric() || c == '_')
                    .is_some()
                {}
                let end = chars.peek().map_or(text.len(), |&(i, _)| i);
                let word = &text[start..end];
                if word.eq_ignore_ascii_case("and") {
                    TokenKind::And
                } else if word.eq_ignore_ascii_case("or") {
                    TokenKind::Or
                } else if word.eq_ignore_ascii_case("not") {
                    TokenKind::Not
                } else {
                    TokenKind::Word
                }
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    token: other.to_string(),
                    position: start,
                })
            }
        };

        let end = chars.peek().map_or(text.len(), |&(i, _)| i);
        tokens.push(Token {
            kind,
            text: text[start..end].to_string(),
            position: start,
        });
    }

    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    start: usize,
) -> Result<String, ParseError> {
    let mut value = String::new();
    loop {
        match chars.next() {
            Some((_, '\\')) => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => return Err(ParseError::UnterminatedString { position: start }),
            },
            Some((_, c)) if c == quote => return Ok(value),
            Some((_, c)) => value.push(c),
            None => return Err(ParseError::UnterminatedString { position: start }),
        }
    }
}

// ─── Recursive descent ─────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &str) -> Result<Token, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::UnexpectedEnd {
                expected: expected.to_string(),
            })?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    // Each production returns the rule with its tree height.

    fn or_expr(&mut self) -> Result<(SegmentRule, usize), ParseError> {
        let (mut rule, mut height) = self.and_expr()?;
        while self.eat(&TokenKind::Or) {
            let (rhs, rhs_height) = self.and_expr()?;
            height = parent_height(height.max(rhs_height))?;
            rule = SegmentRule::Or(Box::new(rule), Box::new(rhs));
        }
        Ok((rule, height))
    }

    fn and_expr(&mut self) -> Result<(SegmentRule, usize), ParseError> {
        let (mut rule, mut height) = self.unary()?;
        while self.eat(&TokenKind::And) {
            let (rhs, rhs_height) = self.unary()?;
            height = parent_height(height.max(rhs_height))?;
            rule = SegmentRule::And(Box::new(rule), Box::new(rhs));
        }
        Ok((rule, height))
    }

    fn unary(&mut self) -> Result<(SegmentRule, usize), ParseError> {
        if self.eat(&TokenKind::Not) {
            self.descend()?;
            let (inner, height) = self.unary()?;
            self.depth -= 1;
            return Ok((SegmentRule::Not(Box::new(inner)), parent_height(height)?));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<(SegmentRule, usize), ParseError> {
        if self.eat(&TokenKind::LParen) {
            self.descend()?;
            let inner = self.or_expr()?;
            let close = self.next("')'")?;
            if close.kind != TokenKind::RParen {
                return Err(close.unexpected());
            }
            self.depth -= 1;
            return Ok(inner);
        }
        Ok((SegmentRule::Comparison(self.comparison()?), 1))
    }

    fn comparison(&mut self) -> Result<Comparison, ParseError> {
        let field_token = self.next("a field name")?;
        if field_token.kind != TokenKind::Word {
            return Err(field_token.unexpected());
        }
        let field = Field::from_name(&field_token.text).ok_or_else(|| ParseError::UnknownField {
            token: field_token.text.clone(),
            position: field_token.position,
        })?;

        let op_token = self.next("a comparison operator")?;
        if op_token.kind != TokenKind::Operator {
            return Err(ParseError::UnknownOperator {
                token: op_token.text.clone(),
                position: op_token.position,
            });
        }
        let operator =
            ComparisonOperator::from_symbol(&op_token.text).ok_or_else(|| {
                ParseError::UnknownOperator {
                    token: op_token.text.clone(),
                    position: op_token.position,
                }
            })?;
        if !field.supports(operator) {
            return Err(ParseError::UnsupportedOperator {
                field: field.as_str().to_string(),
                token: op_token.text,
                position: op_token.position,
            });
        }

        let literal_token = self.next("a literal value")?;
        let value = typed_literal(field, &literal_token)?;

        Ok(Comparison {
            field,
            operator,
            value,
        })
    }
}

/// Height of a node whose tallest child is `child_height` high.
pub(crate) fn parent_height(child_height: usize) -> Result<usize, ParseError> {
    let height = child_height + 1;
    if height > MAX_DEPTH {
        return Err(ParseError::TooDeep { max: MAX_DEPTH });
    }
    Ok(height)
}

/// Check a literal token against the field's type.
fn typed_literal(field: Field, token: &Token) -> Result<Literal, ParseError> {
    let mismatch = |expected: &str| ParseError::TypeMismatch {
        field: field.as_str().to_string(),
        token: token.text.clone(),
        expected: expected.to_string(),
        position: token.position,
    };

    match (field.kind(), &token.kind) {
        (FieldKind::Number, TokenKind::Number(n)) => Ok(Literal::Number(*n)),
        (FieldKind::Number, _) => Err(mismatch("a number")),
        (FieldKind::WholeNumber, TokenKind::Number(n)) if n.fract() == 0.0 => {
            Ok(Literal::Number(*n))
        }
        (FieldKind::WholeNumber, _) => Err(mismatch("a whole number")),
        (FieldKind::Status, TokenKind::Word) | (FieldKind::Status, TokenKind::Text(_)) => {
            let name = match &token.kind {
                TokenKind::Text(t) => t.as_str(),
                _ => token.text.as_str(),
            };
            CustomerStatus::from_name(name)
                .map(Literal::Status)
                .ok_or_else(|| mismatch("Active or Inactive"))
        }
        (FieldKind::Status, _) => Err(mismatch("Active or Inactive")),
        (FieldKind::Text, TokenKind::Text(t)) => Ok(Literal::Text(t.clone())),
        (FieldKind::Text, _) => Err(mismatch("a quoted string")),
    }
}
