//! Customer data platform: ingestion-side storage for customers and
//! orders that segmentation reads from.

pub mod store;

pub use store::InMemoryCustomerStore;
