//! Campaign management: campaign model, lifecycle state machine, the
//! campaign store, and the orchestrator façade that drives rule parsing,
//! audience resolution, and delivery.
//!
//! Campaigns are held in DashMap; the customer store and delivery log are
//! injected behind their traits.

pub mod messages;
pub mod models;
pub mod orchestrator;
pub mod state_machine;
pub mod store;

pub use messages::{suggest_messages, CampaignObjective, MessageTemplate};
pub use models::{Campaign, CreateCampaignRequest};
pub use orchestrator::{DeliveryHandle, Orchestrator};
pub use state_machine::{CampaignStateMachine, StateTransition};
pub use store::{CampaignStore, StartDecision};
