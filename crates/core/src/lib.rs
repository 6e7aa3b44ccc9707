//! Shared domain types, errors, configuration, and collaborator interfaces
//! for the campaign orchestration engine.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult, ParseError};
