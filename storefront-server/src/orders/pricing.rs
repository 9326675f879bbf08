//! Order pricing
//!
//! Pure computation from line items to [`OrderAmounts`]. All arithmetic is in
//! integer pence except VAT, which goes through `rust_decimal` and is rounded
//! half away from zero to whole pence.

use rust_decimal::prelude::*;
use shared::order::{FulfillmentType, LineItem, Money, OrderAmounts};

use super::{OrderError, OrderResult};

/// UK standard VAT rate (20%)
pub const VAT_RATE: Decimal = Decimal::from_parts(20, 0, 0, false, 2);

/// Pricing knobs that vary per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingPolicy {
    pub vat_rate: Decimal,
    /// Delivery orders at or above this subtotal ship free
    pub free_delivery_threshold: Money,
    /// Flat fee charged below the threshold
    pub delivery_fee: Money,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            vat_rate: VAT_RATE,
            free_delivery_threshold: Money::from_pence(500),
            delivery_fee: Money::from_pence(250),
        }
    }
}

impl PricingPolicy {
    /// Price a validated list of line items
    ///
    /// `discount` is clamped to `subtotal + tax + delivery_fee` so the final
    /// amount is never negative.
    pub fn compute(
        &self,
        items: &[LineItem],
        fulfillment: FulfillmentType,
        discount: Money,
    ) -> OrderResult<OrderAmounts> {
        if discount.is_negative() {
            return Err(OrderError::validation("discount must not be negative"));
        }

        let mut subtotal = Money::ZERO;
        for item in items {
            subtotal = subtotal
                .checked_add(line_subtotal(item)?)
                .ok_or_else(|| OrderError::validation("order subtotal overflow"))?;
        }

        let tax = self.tax_on(subtotal)?;
        let delivery_fee = self.delivery_fee_for(fulfillment, subtotal);
        let total = subtotal + tax;
        let gross = total + delivery_fee;
        let discount = discount.min(gross);

        Ok(OrderAmounts {
            subtotal,
            tax,
            delivery_fee,
            discount,
            total,
            final_amount: gross - discount,
        })
    }

    /// `round(subtotal × vat_rate, 2)`, half-up
    pub fn tax_on(&self, subtotal: Money) -> OrderResult<Money> {
        Money::from_decimal(subtotal.to_decimal() * self.vat_rate)
            .ok_or_else(|| OrderError::validation("tax overflow"))
    }

    pub fn delivery_fee_for(&self, fulfillment: FulfillmentType, subtotal: Money) -> Money {
        match fulfillment {
            FulfillmentType::Pickup => Money::ZERO,
            FulfillmentType::Delivery if subtotal >= self.free_delivery_threshold => Money::ZERO,
            FulfillmentType::Delivery => self.delivery_fee,
        }
    }
}

/// `quantity × unit_price`
pub fn line_subtotal(item: &LineItem) -> OrderResult<Money> {
    item.unit_price
        .checked_mul(item.quantity)
        .ok_or_else(|| OrderError::validation(format!("line total overflow for {}", item.product_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: &str, quantity: u32, unit_pence: i64) -> LineItem {
        let unit_price = Money::from_pence(unit_pence);
        LineItem {
            product_id: product_id.to_string(),
            name: product_id.to_string(),
            quantity,
            unit_price,
            subtotal: unit_price.checked_mul(quantity).unwrap(),
        }
    }

    #[test]
    fn test_worked_example() {
        let policy = PricingPolicy::default();
        let items = [item("rose", 2, 165), item("card", 1, 100)];

        let amounts = policy
            .compute(&items, FulfillmentType::Delivery, Money::ZERO)
            .unwrap();

        assert_eq!(amounts.subtotal, Money::from_pence(430));
        assert_eq!(amounts.tax, Money::from_pence(86));
        assert_eq!(amounts.delivery_fee, Money::from_pence(250));
        assert_eq!(amounts.total, Money::from_pence(516));
        assert_eq!(amounts.final_amount, Money::from_pence(766));
    }

    #[test]
    fn test_tax_rounds_half_up() {
        let policy = PricingPolicy::default();
        // 0.124 -> 0.12
        assert_eq!(
            policy.tax_on(Money::from_pence(62)).unwrap(),
            Money::from_pence(12)
        );
        // 0.126 -> 0.13
        assert_eq!(
            policy.tax_on(Money::from_pence(63)).unwrap(),
            Money::from_pence(13)
        );
        // 0.002 -> 0.00
        assert_eq!(
            policy.tax_on(Money::from_pence(1)).unwrap(),
            Money::from_pence(0)
        );
        // 0.05 * 0.2 = 0.01
        assert_eq!(
            policy.tax_on(Money::from_pence(5)).unwrap(),
            Money::from_pence(1)
        );
        // 0.03 * 0.2 = 0.006 -> 0.01
        assert_eq!(
            policy.tax_on(Money::from_pence(3)).unwrap(),
            Money::from_pence(1)
        );
    }

    #[test]
    fn test_free_delivery_at_threshold() {
        let policy = PricingPolicy::default();
        let items = [item("bouquet", 1, 500)];
        let amounts = policy
            .compute(&items, FulfillmentType::Delivery, Money::ZERO)
            .unwrap();
        assert_eq!(amounts.delivery_fee, Money::ZERO);
        assert_eq!(amounts.final_amount, Money::from_pence(600));
    }

    #[test]
    fn test_pickup_never_pays_delivery() {
        let policy = PricingPolicy::default();
        let items = [item("stem", 1, 100)];
        let amounts = policy
            .compute(&items, FulfillmentType::Pickup, Money::ZERO)
            .unwrap();
        assert_eq!(amounts.delivery_fee, Money::ZERO);
        assert_eq!(amounts.final_amount, Money::from_pence(120));
    }

    #[test]
    fn test_discount_clamped_to_gross() {
        let policy = PricingPolicy::default();
        let items = [item("stem", 1, 100)];
        let amounts = policy
            .compute(&items, FulfillmentType::Delivery, Money::from_pence(10_000))
            .unwrap();
        assert_eq!(amounts.discount, Money::from_pence(370));
        assert_eq!(amounts.final_amount, Money::ZERO);
    }

    #[test]
    fn test_negative_discount_rejected() {
        let policy = PricingPolicy::default();
        let items = [item("stem", 1, 100)];
        assert!(matches!(
            policy.compute(&items, FulfillmentType::Pickup, Money::from_pence(-1)),
            Err(OrderError::Validation(_))
        ));
    }

    #[test]
    fn test_final_amount_identity_holds() {
        let policy = PricingPolicy {
            free_delivery_threshold: Money::from_pence(2500),
            delivery_fee: Money::from_pence(299),
            ..PricingPolicy::default()
        };
        for (qty, price, discount) in [(1, 1, 0), (3, 333, 50), (7, 1999, 125), (11, 2, 0)] {
            let items = [item("x", qty, price)];
            let a = policy
                .compute(&items, FulfillmentType::Delivery, Money::from_pence(discount))
                .unwrap();
            assert_eq!(a.final_amount, a.subtotal + a.tax + a.delivery_fee - a.discount);
            assert_eq!(a.tax, policy.tax_on(a.subtotal).unwrap());
        }
    }
}
