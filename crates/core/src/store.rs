//! Storage interfaces for the customer/order data the engine segments over.
//!
//! The engine never assumes a storage technology: audience resolution only
//! needs [`CustomerSource`], ingestion needs the append side in
//! [`CustomerStore`].

use uuid::Uuid;

use crate::error::CampaignResult;
use crate::types::{Customer, NewCustomer, Order};

/// Read side used by audience resolution.
pub trait CustomerSource: Send + Sync {
    /// Visit every customer once. Visit order is unspecified.
    fn scan(&self, visit: &mut dyn FnMut(&Customer)) -> CampaignResult<()>;

    fn get_customer(&self, id: &Uuid) -> CampaignResult<Option<Customer>>;
}

/// Ingestion side: customers are appended or deactivated, orders are
/// appended and folded into spend by an explicit aggregation step.
pub trait CustomerStore: CustomerSource {
    fn insert_customer(&self, customer: NewCustomer) -> CampaignResult<Customer>;

    fn deactivate_customer(&self, id: &Uuid) -> CampaignResult<Customer>;

    fn record_visit(&self, id: &Uuid) -> CampaignResult<Customer>;

    /// Record an order as pending. It does not affect spend until
    /// [`CustomerStore::aggregate_orders`] runs.
    fn record_order(&self, order_id: &str, customer_id: &Uuid, amount: f64)
        -> CampaignResult<Order>;

    /// Fold every pending order into its customer's spend and mark it
    /// processed. Returns the number of orders processed.
    fn aggregate_orders(&self) -> CampaignResult<usize>;

    fn list_orders(&self, customer_id: &Uuid) -> CampaignResult<Vec<Order>>;
}
