//! Audience segmentation: rule parsing, evaluation against customer
//! records, and audience resolution over a customer store.

pub mod audience;
pub mod builder;
pub mod engine;
pub mod parser;
pub mod predicates;

pub use audience::{AudienceResolver, AudienceResult};
pub use builder::SegmentRuleBuilder;
pub use engine::evaluate;
pub use parser::{parse, MAX_DEPTH};
pub use predicates::{Comparison, ComparisonOperator, Field, Literal, SegmentRule};
