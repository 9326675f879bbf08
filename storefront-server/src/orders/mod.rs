//! Order lifecycle
//!
//! - [`pricing`]: amounts from line items
//! - [`validation`]: checkout input rules
//! - [`state_machine`]: transition edges on both status axes
//! - [`storage`]: versioned snapshots
//! - [`OrderManager`]: read-decide-write with stock release and outbox
//! - [`OrderService`]: authorization, gateway calls, audit

mod error;
mod manager;
pub mod pricing;
mod service;
pub mod state_machine;
mod storage;
pub mod validation;

pub use error::{OrderError, OrderResult};
pub use manager::{Decision, Effects, MutationOutcome, OrderManager};
pub use pricing::PricingPolicy;
pub use service::{OrderService, PaymentApplied};
pub use storage::{OrderFilter, OrderStore};
pub use validation::{CreateOrderRequest, CustomerInput, DeliveryAddressInput, LineItemInput};
