//! Checkout input validation
//!
//! Field-level rules are declared on the request DTOs with `validator`;
//! cross-field rules (address vs fulfillment, discount authority, duplicate
//! lines) run in [`normalize`], which turns a request into the owned,
//! trimmed values the order is built from.

use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::order::{
    Actor, ActorKind, CustomerContact, DeliveryAddress, FulfillmentType, LineItem, Money,
    OrderPriority, OrderSource, PaymentMethod,
};
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors};

use super::pricing::line_subtotal;
use super::{OrderError, OrderResult};

pub const MAX_QUANTITY: u32 = 999;

/// £100,000
pub const MAX_UNIT_PRICE: Money = Money::from_pence(10_000_000);

static UK_POSTCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z]{1,2}[0-9][A-Z0-9]?\s*[0-9][A-Z]{2}$").expect("valid postcode regex")
});

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineItemInput {
    #[validate(length(min = 1, max = 64))]
    pub product_id: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 1, max = 999))]
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeliveryAddressInput {
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(custom(function = "validate_postcode"))]
    pub postcode: String,
}

/// `POST /orders` body
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "at least one line item is required"), nested)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub fulfillment: FulfillmentType,
    #[validate(nested)]
    pub delivery_address: Option<DeliveryAddressInput>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(nested)]
    pub customer: CustomerInput,
    #[validate(length(max = 500))]
    pub order_notes: Option<String>,
    #[serde(default)]
    pub priority: OrderPriority,
    #[serde(default)]
    pub source: OrderSource,
    /// Admin-only (phone and in-store orders)
    #[serde(default)]
    pub discount: Money,
    /// Owning customer when an admin places the order on their behalf
    pub customer_id: Option<String>,
}

/// Checkout input after every rule has passed
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOrder {
    pub customer_id: String,
    pub customer: CustomerContact,
    pub items: Vec<LineItem>,
    pub fulfillment: FulfillmentType,
    pub delivery_address: Option<DeliveryAddress>,
    pub payment_method: PaymentMethod,
    pub order_notes: Option<String>,
    pub priority: OrderPriority,
    pub source: OrderSource,
    pub discount: Money,
}

// ============================================================================
// Field validators
// ============================================================================

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let trimmed = phone.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut digits = 0usize;
    for c in body.chars() {
        match c {
            '0'..='9' => digits += 1,
            ' ' | '-' => {}
            _ => return Err(ValidationError::new("phone").with_message("invalid character".into())),
        }
    }
    if !(7..=20).contains(&digits) {
        return Err(ValidationError::new("phone").with_message("must have 7 to 20 digits".into()));
    }
    Ok(())
}

fn validate_postcode(postcode: &str) -> Result<(), ValidationError> {
    if UK_POSTCODE.is_match(postcode.trim()) {
        Ok(())
    } else {
        Err(ValidationError::new("postcode").with_message("invalid UK postcode".into()))
    }
}

/// Upper-case and put exactly one space before the inward code (`sw1a1aa` → `SW1A 1AA`)
pub fn normalize_postcode(postcode: &str) -> String {
    let compact: String = postcode
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let split = compact.len().saturating_sub(3);
    format!("{} {}", &compact[..split], &compact[split..])
}

impl From<ValidationErrors> for OrderError {
    fn from(errors: ValidationErrors) -> Self {
        OrderError::Validation(errors.to_string())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Normalization
// ============================================================================

/// Validate `request` on behalf of `actor`
pub fn normalize(request: CreateOrderRequest, actor: &Actor) -> OrderResult<ValidatedOrder> {
    request.validate()?;

    let customer_id = match actor.kind {
        ActorKind::Customer => match request.customer_id.as_deref() {
            Some(id) if id != actor.id => {
                return Err(OrderError::Forbidden(
                    "customers may only place orders for themselves".to_string(),
                ));
            }
            _ => actor.id.clone(),
        },
        ActorKind::Admin => non_empty(request.customer_id)
            .ok_or_else(|| OrderError::validation("customer_id is required for admin orders"))?,
        ActorKind::System => {
            return Err(OrderError::Forbidden(
                "orders are placed by customers or admins".to_string(),
            ));
        }
    };

    if request.discount.is_negative() {
        return Err(OrderError::validation("discount must not be negative"));
    }
    if !request.discount.is_zero() && !actor.is_admin() {
        return Err(OrderError::validation("only an admin may apply a discount"));
    }

    if request.payment_method == PaymentMethod::Cash
        && request.fulfillment != FulfillmentType::Pickup
    {
        return Err(OrderError::validation("cash payment is only available for pickup"));
    }

    let delivery_address = match (request.fulfillment, request.delivery_address) {
        (FulfillmentType::Delivery, Some(address)) => Some(DeliveryAddress {
            street: address.street.trim().to_string(),
            city: address.city.trim().to_string(),
            postcode: normalize_postcode(&address.postcode),
        }),
        (FulfillmentType::Delivery, None) => {
            return Err(OrderError::validation(
                "delivery_address is required for delivery orders",
            ));
        }
        (FulfillmentType::Pickup, _) => None,
    };

    let items = merge_lines(request.items)?;

    Ok(ValidatedOrder {
        customer_id,
        customer: CustomerContact {
            name: request.customer.name.trim().to_string(),
            email: request.customer.email.trim().to_ascii_lowercase(),
            phone: request.customer.phone.trim().to_string(),
        },
        items,
        fulfillment: request.fulfillment,
        delivery_address,
        payment_method: request.payment_method,
        order_notes: non_empty(request.order_notes),
        priority: request.priority,
        source: request.source,
        discount: request.discount,
    })
}

/// Merge lines for the same product, keeping first-seen order
fn merge_lines(inputs: Vec<LineItemInput>) -> OrderResult<Vec<LineItem>> {
    let mut items: Vec<LineItem> = Vec::with_capacity(inputs.len());

    for input in inputs {
        if input.unit_price.is_negative() || input.unit_price > MAX_UNIT_PRICE {
            return Err(OrderError::validation(format!(
                "unit_price for {} must be between 0 and {}",
                input.product_id, MAX_UNIT_PRICE
            )));
        }

        let product_id = input.product_id.trim().to_string();
        match items.iter_mut().find(|item| item.product_id == product_id) {
            Some(existing) => {
                if existing.unit_price != input.unit_price {
                    return Err(OrderError::validation(format!(
                        "conflicting unit prices for {}",
                        product_id
                    )));
                }
                existing.quantity += input.quantity;
                if existing.quantity > MAX_QUANTITY {
                    return Err(OrderError::validation(format!(
                        "quantity for {} exceeds {}",
                        product_id, MAX_QUANTITY
                    )));
                }
            }
            None => items.push(LineItem {
                product_id,
                name: input.name.trim().to_string(),
                quantity: input.quantity,
                unit_price: input.unit_price,
                subtotal: Money::ZERO,
            }),
        }
    }

    for item in &mut items {
        item.subtotal = line_subtotal(item)?;
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: &str, quantity: u32, pence: i64) -> LineItemInput {
        LineItemInput {
            product_id: product_id.to_string(),
            name: product_id.to_string(),
            quantity,
            unit_price: Money::from_pence(pence),
        }
    }

    fn request(fulfillment: FulfillmentType) -> CreateOrderRequest {
        CreateOrderRequest {
            items: vec![line("rose", 2, 165)],
            fulfillment,
            delivery_address: Some(DeliveryAddressInput {
                street: " 1 Petal Lane ".to_string(),
                city: "London".to_string(),
                postcode: "sw1a1aa".to_string(),
            }),
            payment_method: PaymentMethod::Stripe,
            customer: CustomerInput {
                name: "Ada".to_string(),
                email: "Ada@Example.com".to_string(),
                phone: "+44 7700-900123".to_string(),
            },
            order_notes: Some("  ".to_string()),
            priority: OrderPriority::Normal,
            source: OrderSource::Website,
            discount: Money::ZERO,
            customer_id: None,
        }
    }

    #[test]
    fn test_normalizes_contact_and_address() {
        let order = normalize(request(FulfillmentType::Delivery), &Actor::customer("c-1")).unwrap();
        assert_eq!(order.customer_id, "c-1");
        assert_eq!(order.customer.email, "ada@example.com");
        let address = order.delivery_address.unwrap();
        assert_eq!(address.street, "1 Petal Lane");
        assert_eq!(address.postcode, "SW1A 1AA");
        assert_eq!(order.order_notes, None);
        assert_eq!(order.items[0].subtotal, Money::from_pence(330));
    }

    #[test]
    fn test_delivery_requires_address() {
        let mut req = request(FulfillmentType::Delivery);
        req.delivery_address = None;
        assert!(matches!(
            normalize(req, &Actor::customer("c-1")),
            Err(OrderError::Validation(_))
        ));
    }

    #[test]
    fn test_pickup_ignores_address() {
        let order = normalize(request(FulfillmentType::Pickup), &Actor::customer("c-1")).unwrap();
        assert!(order.delivery_address.is_none());
    }

    #[test]
    fn test_empty_items_rejected() {
        let mut req = request(FulfillmentType::Pickup);
        req.items.clear();
        assert!(matches!(
            normalize(req, &Actor::customer("c-1")),
            Err(OrderError::Validation(_))
        ));
    }

    #[test]
    fn test_quantity_bounds() {
        let mut req = request(FulfillmentType::Pickup);
        req.items = vec![line("rose", 0, 100)];
        assert!(normalize(req, &Actor::customer("c-1")).is_err());

        let mut req = request(FulfillmentType::Pickup);
        req.items = vec![line("rose", 1000, 100)];
        assert!(normalize(req, &Actor::customer("c-1")).is_err());
    }

    #[test]
    fn test_duplicate_lines_merged() {
        let mut req = request(FulfillmentType::Pickup);
        req.items = vec![line("rose", 2, 165), line("card", 1, 100), line("rose", 3, 165)];
        let order = normalize(req, &Actor::customer("c-1")).unwrap();
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].product_id, "rose");
        assert_eq!(order.items[0].quantity, 5);
        assert_eq!(order.items[0].subtotal, Money::from_pence(825));
    }

    #[test]
    fn test_duplicate_lines_with_different_prices_rejected() {
        let mut req = request(FulfillmentType::Pickup);
        req.items = vec![line("rose", 1, 165), line("rose", 1, 150)];
        assert!(normalize(req, &Actor::customer("c-1")).is_err());
    }

    #[test]
    fn test_merged_quantity_over_limit_rejected() {
        let mut req = request(FulfillmentType::Pickup);
        req.items = vec![line("rose", 600, 1), line("rose", 600, 1)];
        assert!(normalize(req, &Actor::customer("c-1")).is_err());
    }

    #[test]
    fn test_price_bounds() {
        let mut req = request(FulfillmentType::Pickup);
        req.items = vec![line("rose", 1, -1)];
        assert!(normalize(req, &Actor::customer("c-1")).is_err());

        let mut req = request(FulfillmentType::Pickup);
        req.items = vec![line("rose", 1, 10_000_001)];
        assert!(normalize(req, &Actor::customer("c-1")).is_err());
    }

    #[test]
    fn test_customer_discount_rejected() {
        let mut req = request(FulfillmentType::Pickup);
        req.discount = Money::from_pence(100);
        assert!(matches!(
            normalize(req.clone(), &Actor::customer("c-1")),
            Err(OrderError::Validation(_))
        ));

        req.customer_id = Some("c-1".to_string());
        let order = normalize(req, &Actor::admin("admin-1")).unwrap();
        assert_eq!(order.discount, Money::from_pence(100));
        assert_eq!(order.customer_id, "c-1");
    }

    #[test]
    fn test_admin_must_name_customer() {
        let req = request(FulfillmentType::Pickup);
        assert!(matches!(
            normalize(req, &Actor::admin("admin-1")),
            Err(OrderError::Validation(_))
        ));
    }

    #[test]
    fn test_customer_cannot_order_for_someone_else() {
        let mut req = request(FulfillmentType::Pickup);
        req.customer_id = Some("c-2".to_string());
        assert!(matches!(
            normalize(req, &Actor::customer("c-1")),
            Err(OrderError::Forbidden(_))
        ));
    }

    #[test]
    fn test_cash_requires_pickup() {
        let mut req = request(FulfillmentType::Delivery);
        req.payment_method = PaymentMethod::Cash;
        assert!(normalize(req.clone(), &Actor::customer("c-1")).is_err());

        req.fulfillment = FulfillmentType::Pickup;
        assert!(normalize(req, &Actor::customer("c-1")).is_ok());
    }

    #[test]
    fn test_contact_rules() {
        let mut req = request(FulfillmentType::Pickup);
        req.customer.email = "not-an-email".to_string();
        assert!(normalize(req, &Actor::customer("c-1")).is_err());

        let mut req = request(FulfillmentType::Pickup);
        req.customer.phone = "12345".to_string();
        assert!(normalize(req, &Actor::customer("c-1")).is_err());

        let mut req = request(FulfillmentType::Pickup);
        req.customer.phone = "0770x900123".to_string();
        assert!(normalize(req, &Actor::customer("c-1")).is_err());
    }

    #[test]
    fn test_postcode_rules() {
        assert!(validate_postcode("SW1A 1AA").is_ok());
        assert!(validate_postcode("m1 1ae").is_ok());
        assert!(validate_postcode("B33 8TH").is_ok());
        assert!(validate_postcode("12345").is_err());
        assert_eq!(normalize_postcode("m11ae"), "M1 1AE");
        assert_eq!(normalize_postcode("ec1a  1bb"), "EC1A 1BB");
    }
}
