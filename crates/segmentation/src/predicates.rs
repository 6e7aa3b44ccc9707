//! Segment rule tree: comparisons over whitelisted customer fields joined
//! by AND / OR / NOT.

use campaign_core::types::CustomerStatus;
use campaign_core::ParseError;
use serde::{Deserialize, Serialize};

/// A parsed segmentation rule. Serialized as its canonical text form, so a
/// stored rule always passes back through the parser on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SegmentRule {
    Comparison(Comparison),
    And(Box<SegmentRule>, Box<SegmentRule>),
    Or(Box<SegmentRule>, Box<SegmentRule>),
    Not(Box<SegmentRule>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: Field,
    pub operator: ComparisonOperator,
    pub value: Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Spend,
    Visits,
    Status,
    Name,
    Email,
}

/// What kind of literal a field compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    WholeNumber,
    Status,
    Text,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Spend,
        Field::Visits,
        Field::Status,
        Field::Name,
        Field::Email,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Spend => "spend",
            Field::Visits => "visits",
            Field::Status => "status",
            Field::Name => "name",
            Field::Email => "email",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Spend => FieldKind::Number,
            Field::Visits => FieldKind::WholeNumber,
            Field::Status => FieldKind::Status,
            Field::Name | Field::Email => FieldKind::Text,
        }
    }

    /// Ordering operators only make sense on numeric fields.
    pub fn supports(&self, operator: ComparisonOperator) -> bool {
        match self.kind() {
            FieldKind::Number | FieldKind::WholeNumber => true,
            FieldKind::Status | FieldKind::Text => operator.is_equality(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl ComparisonOperator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(Self::Equals),
            "!=" => Some(Self::NotEquals),
            ">" => Some(Self::GreaterThan),
            ">=" => Some(Self::GreaterThanOrEqual),
            "<" => Some(Self::LessThan),
            "<=" => Some(Self::LessThanOrEqual),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, Self::Equals | Self::NotEquals)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Status(CustomerStatus),
    Text(String),
}

impl SegmentRule {
    /// Tree height: 1 for a lone comparison, plus one per AND, OR or NOT on
    /// the longest path. Walks an explicit stack, so any tree can be measured.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, level)) = stack.pop() {
            max = max.max(level);
            match node {
                SegmentRule::Comparison(_) => {}
                SegmentRule::And(l, r) | SegmentRule::Or(l, r) => {
                    stack.push((l, level + 1));
                    stack.push((r, level + 1));
                }
                SegmentRule::Not(inner) => stack.push((inner, level + 1)),
            }
        }
        max
    }
}

// ─── Canonical text form ────────────────────────────────────────────────────

impl SegmentRule {
    /// Binding strength used when printing; higher binds tighter.
    fn precedence(&self) -> u8 {
        match self {
            SegmentRule::Or(..) => 1,
            SegmentRule::And(..) => 2,
            SegmentRule::Not(_) => 3,
            SegmentRule::Comparison(_) => 4,
        }
    }

    fn fmt_operand(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        min_precedence: u8,
    ) -> std::fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl std::fmt::Display for SegmentRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentRule::Comparison(c) => write!(f, "{}", c),
            // Left-associative: the right operand needs parens at equal precedence.
            SegmentRule::And(l, r) => {
                l.fmt_operand(f, 2)?;
                f.write_str(" AND ")?;
                r.fmt_operand(f, 3)
            }
            SegmentRule::Or(l, r) => {
                l.fmt_operand(f, 1)?;
                f.write_str(" OR ")?;
                r.fmt_operand(f, 2)
            }
            SegmentRule::Not(inner) => {
                f.write_str("NOT ")?;
                inner.fmt_operand(f, 3)
            }
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.field.as_str(),
            self.operator.symbol(),
            self.value
        )
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Status(s) => f.write_str(s.as_str()),
            Literal::Text(t) => {
                f.write_str("\"")?;
                for c in t.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")
            }
        }
    }
}

impl From<SegmentRule> for String {
    fn from(rule: SegmentRule) -> Self {
        rule.to_string()
    }
}

impl TryFrom<String> for SegmentRule {
    type Error = ParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        crate::parser::parse(&text)
    }
}

impl std::str::FromStr for SegmentRule {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        crate::parser::parse(text)
    }
}
