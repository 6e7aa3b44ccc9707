//! Segment rule builder: fluent API for constructing rules in code.

use campaign_core::types::CustomerStatus;
use campaign_core::ParseError;

use crate::parser::{parent_height, MAX_DEPTH};
use crate::predicates::{Comparison, ComparisonOperator, Field, Literal, SegmentRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joiner {
    And,
    Or,
}

/// Collects clauses and joins them with AND (default) or OR. Every clause
/// is typed at the call site, so a built rule always passes the parser's
/// field and literal checks.
pub struct SegmentRuleBuilder {
    clauses: Vec<SegmentRule>,
    joiner: Joiner,
}

impl SegmentRuleBuilder {
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
            joiner: Joiner::And,
        }
    }

    pub fn with_or(mut self) -> Self {
        self.joiner = Joiner::Or;
        self
    }

    fn push(mut self, field: Field, operator: ComparisonOperator, value: Literal) -> Self {
        self.clauses.push(SegmentRule::Comparison(Comparison {
            field,
            operator,
            value,
        }));
        self
    }

    pub fn spend(self, operator: ComparisonOperator, amount: f64) -> Self {
        self.push(Field::Spend, operator, Literal::Number(amount))
    }

    pub fn spend_gt(self, amount: f64) -> Self {
        self.spend(ComparisonOperator::GreaterThan, amount)
    }

    pub fn visits(self, operator: ComparisonOperator, count: u32) -> Self {
        self.push(Field::Visits, operator, Literal::Number(f64::from(count)))
    }

    pub fn visits_lt(self, count: u32) -> Self {
        self.visits(ComparisonOperator::LessThan, count)
    }

    pub fn status_is(self, status: CustomerStatus) -> Self {
        self.push(Field::Status, ComparisonOperator::Equals, Literal::Status(status))
    }

    pub fn email_is(self, email: impl Into<String>) -> Self {
        self.push(Field::Email, ComparisonOperator::Equals, Literal::Text(email.into()))
    }

    pub fn name_is(self, name: impl Into<String>) -> Self {
        self.push(Field::Name, ComparisonOperator::Equals, Literal::Text(name.into()))
    }

    /// Add an already-built sub-rule as a single clause.
    pub fn group(mut self, rule: SegmentRule) -> Self {
        self.clauses.push(rule);
        self
    }

    pub fn exclude(mut self, rule: SegmentRule) -> Self {
        self.clauses.push(SegmentRule::Not(Box::new(rule)));
        self
    }

    /// An empty builder is rejected the same way empty rule text is, and a
    /// rule taller than [`MAX_DEPTH`] the same way over-deep text is.
    pub fn build(self) -> Result<SegmentRule, ParseError> {
        let joiner = self.joiner;
        let mut clauses = self.clauses.into_iter();
        let first = clauses.next().ok_or(ParseError::Empty)?;
        let mut height = first.depth();
        if height > MAX_DEPTH {
            return Err(ParseError::TooDeep { max: MAX_DEPTH });
        }
        let mut rule = first;
        for next in clauses {
            height = parent_height(height.max(next.depth()))?;
            rule = match joiner {
                Joiner::And => SegmentRule::And(Box::new(rule), Box::new(next)),
                Joiner::Or => SegmentRule::Or(Box::new(rule), Box::new(next)),
            };
        }
        Ok(rule)
    }
}

impl Default for SegmentRuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_builder_matches_parsed_rule() {
        let built = SegmentRuleBuilder::new()
            .spend_gt(10000.0)
            .visits_lt(3)
            .build()
            .unwrap();
        assert_eq!(built, parse("spend > 10000 AND visits < 3").unwrap());
    }

    #[test]
    fn test_builder_or_with_exclusion() {
        let vip = SegmentRuleBuilder::new().email_is("vip@example.com").build().unwrap();
        let rule = SegmentRuleBuilder::new()
            .with_or()
            .status_is(CustomerStatus::Active)
            .exclude(vip)
            .build()
            .unwrap();
        assert_eq!(
            rule.to_string(),
            "status == Active OR NOT email == \"vip@example.com\""
        );
    }

    #[test]
    fn test_empty_builder_rejected() {
        assert_eq!(SegmentRuleBuilder::new().build(), Err(ParseError::Empty));
    }

    #[test]
    fn test_builder_enforces_depth_bound() {
        let longest = (1..MAX_DEPTH).fold(SegmentRuleBuilder::new().spend_gt(0.0), |b, i| {
            b.spend_gt(i as f64)
        });
        assert_eq!(longest.build().unwrap().depth(), MAX_DEPTH);

        let too_long = (0..MAX_DEPTH).fold(SegmentRuleBuilder::new().with_or(), |b, i| {
            b.visits_lt(i as u32)
        });
        assert!(too_long.visits_lt(0).build().is_err());

        let tall = parse(&vec!["spend > 1"; MAX_DEPTH].join(" AND ")).unwrap();
        assert!(matches!(
            SegmentRuleBuilder::new().exclude(tall).build(),
            Err(ParseError::TooDeep { .. })
        ));
    }
}
