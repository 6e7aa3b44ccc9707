//! Rule evaluation against a single customer record.

use campaign_core::types::Customer;

use crate::predicates::{Comparison, ComparisonOperator, Field, Literal, SegmentRule};

/// Evaluate `rule` against `customer`. Pure and total: a comparison whose
/// literal does not fit its field evaluates to `false` rather than failing.
pub fn evaluate(rule: &SegmentRule, customer: &Customer) -> bool {
    match rule {
        SegmentRule::Comparison(c) => evaluate_comparison(c, customer),
        SegmentRule::And(l, r) => evaluate(l, customer) && evaluate(r, customer),
        SegmentRule::Or(l, r) => evaluate(l, customer) || evaluate(r, customer),
        SegmentRule::Not(inner) => !evaluate(inner, customer),
    }
}

impl SegmentRule {
    pub fn evaluate(&self, customer: &Customer) -> bool {
        evaluate(self, customer)
    }
}

fn evaluate_comparison(comparison: &Comparison, customer: &Customer) -> bool {
    let op = comparison.operator;
    match (comparison.field, &comparison.value) {
        (Field::Spend, Literal::Number(n)) => compare_numbers(customer.spend, op, *n),
        (Field::Visits, Literal::Number(n)) => compare_numbers(f64::from(customer.visits), op, *n),
        (Field::Status, Literal::Status(s)) => compare_equality(&customer.status, op, s),
        (Field::Name, Literal::Text(t)) => compare_equality(customer.name.as_str(), op, t.as_str()),
        (Field::Email, Literal::Text(t)) => {
            let matches = customer.email.eq_ignore_ascii_case(t);
            match op {
                ComparisonOperator::Equals => matches,
                ComparisonOperator::NotEquals => !matches,
                _ => false,
            }
        }
        _ => false,
    }
}

pub fn compare_numbers(actual: f64, operator: ComparisonOperator, expected: f64) -> bool {
    match operator {
        ComparisonOperator::Equals => actual == expected,
        ComparisonOperator::NotEquals => actual != expected,
        ComparisonOperator::GreaterThan => actual > expected,
        ComparisonOperator::GreaterThanOrEqual => actual >= expected,
        ComparisonOperator::LessThan => actual < expected,
        ComparisonOperator::LessThanOrEqual => actual <= expected,
    }
}

fn compare_equality<T: PartialEq + ?Sized>(
    actual: &T,
    operator: ComparisonOperator,
    expected: &T,
) -> bool {
    match operator {
        ComparisonOperator::Equals => actual == expected,
        ComparisonOperator::NotEquals => actual != expected,
        _ => false,
    }
}
