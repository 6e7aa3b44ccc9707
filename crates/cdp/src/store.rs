//! In-memory customer and order store backed by DashMap.
//!
//! Production deployments put a database behind the same `CustomerStore`
//! trait; this implementation serves development, the CLI, and tests.

use campaign_core::store::{CustomerSource, CustomerStore};
use campaign_core::types::{Customer, CustomerStatus, NewCustomer, Order, OrderStatus};
use campaign_core::{CampaignError, CampaignResult};
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

pub struct InMemoryCustomerStore {
    customers: DashMap<Uuid, Customer>,
    /// Orders keyed by customer, in recording order.
    orders: DashMap<Uuid, Vec<Order>>,
    /// Guards order-id uniqueness across customers.
    order_ids: DashMap<String, Uuid>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        info!("Customer store initialized (in-memory)");
        Self {
            customers: DashMap::new(),
            orders: DashMap::new(),
            order_ids: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn list_customers(&self) -> Vec<Customer> {
        let mut customers: Vec<Customer> =
            self.customers.iter().map(|r| r.value().clone()).collect();
        customers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        customers
    }

    fn update_customer<F>(&self, id: &Uuid, f: F) -> CampaignResult<Customer>
    where
        F: FnOnce(&mut Customer),
    {
        let mut entry = self
            .customers
            .get_mut(id)
            .ok_or_else(|| CampaignError::Validation(format!("Customer {} not found", id)))?;
        f(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(entry.value().clone())
    }
}

impl Default for InMemoryCustomerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_amount(label: &str, value: f64) -> CampaignResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(CampaignError::Validation(format!(
            "{} must be a non-negative number, got {}",
            label, value
        )));
    }
    Ok(())
}

impl CustomerSource for InMemoryCustomerStore {
    fn scan(&self, visit: &mut dyn FnMut(&Customer)) -> CampaignResult<()> {
        for entry in self.customers.iter() {
            visit(entry.value());
        }
        Ok(())
    }

    fn get_customer(&self, id: &Uuid) -> CampaignResult<Option<Customer>> {
        Ok(self.customers.get(id).map(|r| r.value().clone()))
    }
}

impl CustomerStore for InMemoryCustomerStore {
    fn insert_customer(&self, customer: NewCustomer) -> CampaignResult<Customer> {
        check_amount("spend", customer.spend)?;
        if customer.email.trim().is_empty() {
            return Err(CampaignError::Validation("email is required".into()));
        }

        let now = Utc::now();
        let record = Customer {
            id: Uuid::new_v4(),
            name: customer.name,
            email: customer.email,
            spend: customer.spend,
            visits: customer.visits,
            status: CustomerStatus::Active,
            created_at: now,
            updated_at: now,
        };
        info!(customer_id = %record.id, email = %record.email, "Customer ingested");
        self.customers.insert(record.id, record.clone());
        Ok(record)
    }

    fn deactivate_customer(&self, id: &Uuid) -> CampaignResult<Customer> {
        let customer = self.update_customer(id, |c| c.status = CustomerStatus::Inactive)?;
        info!(customer_id = %id, "Customer deactivated");
        Ok(customer)
    }

    fn record_visit(&self, id: &Uuid) -> CampaignResult<Customer> {
        self.update_customer(id, |c| c.visits = c.visits.saturating_add(1))
    }

    fn record_order(
        &self,
        order_id: &str,
        customer_id: &Uuid,
        amount: f64,
    ) -> CampaignResult<Order> {
        check_amount("order amount", amount)?;
        if order_id.trim().is_empty() {
            return Err(CampaignError::Validation("order id is required".into()));
        }
        if !self.customers.contains_key(customer_id) {
            return Err(CampaignError::Validation(format!(
                "Order {} references unknown customer {}",
                order_id, customer_id
            )));
        }

        match self.order_ids.entry(order_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CampaignError::Validation(format!(
                    "Order {} already recorded",
                    order_id
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(*customer_id);
            }
        }

        let order = Order {
            order_id: order_id.to_string(),
            customer_id: *customer_id,
            amount,
            status: OrderStatus::Pending,
            recorded_at: Utc::now(),
            processed_at: None,
        };
        debug!(order_id = %order_id, customer_id = %customer_id, amount, "Order recorded");
        self.orders.entry(*customer_id).or_default().push(order.clone());
        Ok(order)
    }

    fn aggregate_orders(&self) -> CampaignResult<usize> {
        let mut processed = 0usize;
        let now = Utc::now();

        for mut entry in self.orders.iter_mut() {
            let customer_id = *entry.key();
            let mut pending_total = 0.0;
            for order in entry.value_mut().iter_mut() {
                if order.status == OrderStatus::Pending {
                    order.status = OrderStatus::Processed;
                    order.processed_at = Some(now);
                    pending_total += order.amount;
                    processed += 1;
                }
            }
            if pending_total > 0.0 {
                if let Some(mut customer) = self.customers.get_mut(&customer_id) {
                    customer.spend += pending_total;
                    customer.updated_at = now;
                }
            }
        }

        info!(processed, "Pending orders aggregated into customer spend");
        Ok(processed)
    }

    fn list_orders(&self, customer_id: &Uuid) -> CampaignResult<Vec<Order>> {
        Ok(self
            .orders
            .get(customer_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}
