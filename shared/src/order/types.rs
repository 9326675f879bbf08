//! Order aggregate and its value types

use super::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Status axes
// ============================================================================

/// Fulfillment status of an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// `delivered` and `cancelled` accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status, a parallel axis to [`OrderStatus`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment through the gateway
    #[default]
    Stripe,
    Paypal,
    /// Paid at the counter, confirmed by an admin
    Cash,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    #[default]
    Delivery,
    Pickup,
}

/// Whether the stock reserved at checkout is still held by the order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockState {
    #[default]
    Reserved,
    Released,
}

/// Record lifecycle, orders are tombstoned rather than deleted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    #[default]
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    #[default]
    Website,
    Phone,
    InStore,
}

// ============================================================================
// Actor
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    System,
    Admin,
    Customer,
}

/// Who requested a state change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            kind: ActorKind::System,
            id: "system".to_string(),
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Admin,
            id: id.into(),
        }
    }

    pub fn customer(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Customer,
            id: id.into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.kind == ActorKind::Admin
    }

    pub fn is_system(&self) -> bool {
        self.kind == ActorKind::System
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ActorKind::System => "system",
            ActorKind::Admin => "admin",
            ActorKind::Customer => "customer",
        };
        write!(f, "{}:{}", kind, self.id)
    }
}

// ============================================================================
// Aggregate parts
// ============================================================================

/// One ordered product with its price snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub product_id: String,
    /// Product name at checkout time
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// `quantity × unit_price`
    pub subtotal: Money,
}

/// Computed amounts, all in pence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrderAmounts {
    pub subtotal: Money,
    pub tax: Money,
    pub delivery_fee: Money,
    pub discount: Money,
    /// `subtotal + tax`
    pub total: Money,
    /// `subtotal + tax + delivery_fee − discount`, never negative
    pub final_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    pub postcode: String,
}

/// One accepted transition on either status axis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub timestamp: i64,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Set when a dispute is opened against the order's charge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualReview {
    pub dispute_id: String,
    pub reason: Option<String>,
    pub flagged_at: i64,
}

// ============================================================================
// Order
// ============================================================================

/// Order aggregate root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// `ORD-00001`
    pub order_id: String,
    pub customer_id: String,
    pub customer: CustomerContact,
    pub items: Vec<LineItem>,
    pub fulfillment: FulfillmentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<DeliveryAddress>,
    pub amounts: OrderAmounts,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    pub stock_state: StockState,
    pub record_state: RecordState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_review: Option<ManualReview>,
    pub priority: OrderPriority,
    pub source: OrderSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Append-only
    pub status_history: Vec<StatusHistoryEntry>,
    /// Optimistic concurrency counter, bumped by every accepted transition
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
}

impl Order {
    pub fn is_archived(&self) -> bool {
        self.record_state == RecordState::Archived
    }

    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status,
            PaymentStatus::Completed | PaymentStatus::Refunded
        )
    }

    /// Whether `actor` may read or act on this order as its owner
    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        actor.kind == ActorKind::Customer && actor.id == self.customer_id
    }

    pub fn quantity_of(&self, product_id: &str) -> u32 {
        self.items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.quantity)
            .sum()
    }
}
