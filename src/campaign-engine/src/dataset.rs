//! JSON dataset loading for the CLI: customers with their orders.
//!
//! ```json
//! { "customers": [
//!     { "name": "Ana", "email": "ana@example.com", "spend": 20000, "visits": 1,
//!       "status": "active", "orders": [ { "order_id": "o-1", "amount": 250.0 } ] }
//! ] }
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use campaign_cdp::InMemoryCustomerStore;
use campaign_core::store::CustomerStore;
use campaign_core::types::{CustomerStatus, NewCustomer};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct Dataset {
    pub customers: Vec<CustomerRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerRecord {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub spend: f64,
    #[serde(default)]
    pub visits: u32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
}

#[derive(Debug, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub amount: f64,
}

impl Dataset {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading dataset {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing dataset {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Ingest every customer and order, then fold the orders into spend.
    pub fn load_into(self, store: &InMemoryCustomerStore) -> Result<usize> {
        let mut orders = 0usize;
        for record in self.customers {
            let status = match record.status.as_deref() {
                None => CustomerStatus::Active,
                Some(name) => match CustomerStatus::from_name(name) {
                    Some(status) => status,
                    None => bail!("customer {}: unknown status '{}'", record.email, name),
                },
            };

            let customer = store.insert_customer(NewCustomer {
                name: record.name,
                email: record.email,
                spend: record.spend,
                visits: record.visits,
            })?;
            for order in &record.orders {
                store.record_order(&order.order_id, &customer.id, order.amount)?;
                orders += 1;
            }
            if status == CustomerStatus::Inactive {
                store.deactivate_customer(&customer.id)?;
            }
        }

        let aggregated = store.aggregate_orders()?;
        info!(customers = store.len(), orders, aggregated, "Dataset loaded");
        Ok(store.len())
    }
}
