mod common;

use common::{Harness, harness, order_request};
use shared::error::ErrorCode;
use shared::order::{FulfillmentType, Money, OrderStatus, PaymentMethod, PaymentStatus, StockState};
use storefront_server::OrderError;

#[test]
fn test_checkout_prices_and_reserves() {
    let h = harness();
    let order = h.place_example_order();

    assert_eq!(order.order_id, "ORD-00001");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.amounts.subtotal, Money::from_pence(430));
    assert_eq!(order.amounts.tax, Money::from_pence(86));
    assert_eq!(order.amounts.delivery_fee, Money::from_pence(250));
    assert_eq!(order.amounts.final_amount, Money::from_pence(766));
    assert_eq!(order.version, 1);
    assert_eq!(order.status_history.len(), 1);
    assert_eq!(order.stock_state, StockState::Reserved);
    assert_eq!(order.customer.email, "ada@example.com");
    assert_eq!(order.delivery_address.as_ref().unwrap().postcode, "SW1A 1AA");

    assert_eq!(h.stock_of("rose"), 8);
    assert_eq!(h.stock_of("card"), 9);
}

#[test]
fn test_pickup_has_no_delivery_fee() {
    let h = harness();
    h.stock("rose", 5);
    let order = h
        .state
        .orders
        .create_order(
            &Harness::customer(),
            order_request(&[("rose", 1, 165)], FulfillmentType::Pickup),
        )
        .unwrap();
    assert!(order.amounts.delivery_fee.is_zero());
    assert_eq!(order.amounts.final_amount, Money::from_pence(198));
}

#[test]
fn test_insufficient_stock_writes_nothing() {
    let h = harness();
    h.stock("rose", 1);
    h.stock("card", 10);
    let err = h
        .state
        .orders
        .create_order(
            &Harness::customer(),
            order_request(&[("card", 1, 100), ("rose", 2, 165)], FulfillmentType::Pickup),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::InsufficientStock { ref product_id, requested: 2, available: 1 } if product_id == "rose"
    ));
    assert_eq!(h.stock_of("card"), 10);
    assert!(h
        .state
        .orders
        .list_orders(&Harness::admin(), None, true)
        .unwrap()
        .is_empty());
}

#[test]
fn test_customer_cannot_discount() {
    let h = harness();
    h.stock("rose", 5);
    let mut request = order_request(&[("rose", 1, 165)], FulfillmentType::Pickup);
    request.discount = Money::from_pence(50);
    let err = h
        .state
        .orders
        .create_order(&Harness::customer(), request)
        .unwrap_err();
    assert!(matches!(err, OrderError::Validation(_)));
    assert_eq!(h.stock_of("rose"), 5);
}

#[test]
fn test_cancel_pending_restores_stock_once() {
    let h = harness();
    let order = h.place_example_order();
    let customer = Harness::customer();

    let cancelled = h
        .state
        .orders
        .cancel(&customer, &order.order_id, Some("changed my mind".into()))
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.stock_state, StockState::Released);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("changed my mind"));
    assert_eq!(h.stock_of("rose"), 10);
    assert_eq!(h.stock_of("card"), 10);

    let again = h
        .state
        .orders
        .cancel(&customer, &order.order_id, None)
        .unwrap();
    assert_eq!(again.version, cancelled.version);
    assert_eq!(again.status_history.len(), cancelled.status_history.len());
    assert_eq!(h.stock_of("rose"), 10);
    assert_eq!(h.stock_of("card"), 10);
}

#[tokio::test]
async fn test_delivered_order_rejects_cancel() {
    let h = harness();
    let order = h.place_example_order();
    h.pay_at_gateway(&order.order_id).await;
    let admin = Harness::admin();
    h.state
        .orders
        .pay(&Harness::customer(), &order.order_id)
        .await
        .unwrap();
    for status in [
        OrderStatus::Processing,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ] {
        h.state
            .orders
            .update_status(&admin, &order.order_id, status, None)
            .unwrap();
    }
    let delivered = h.state.orders.get_order(&admin, &order.order_id).unwrap();
    assert!(delivered.delivered_at.is_some());

    let err = h
        .state
        .orders
        .cancel(&admin, &order.order_id, None)
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::InvalidTransition { from: OrderStatus::Delivered, to: OrderStatus::Cancelled, .. }
    ));
    let after = h.state.orders.get_order(&admin, &order.order_id).unwrap();
    assert_eq!(after.status_history, delivered.status_history);
    assert_eq!(after.version, delivered.version);
}

#[tokio::test]
async fn test_pay_callback_confirms_and_is_idempotent() {
    let h = harness();
    let order = h.place_example_order();
    let intent_id = h.pay_at_gateway(&order.order_id).await;
    let customer = Harness::customer();

    let paid = h.state.orders.pay(&customer, &order.order_id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Confirmed);
    assert_eq!(paid.payment_status, PaymentStatus::Completed);
    assert_eq!(paid.payment_intent_id.as_deref(), Some(intent_id.as_str()));
    assert!(paid.paid_at.is_some());
    assert!(paid.confirmed_at.is_some());

    let again = h.state.orders.pay(&customer, &order.order_id).await.unwrap();
    assert_eq!(again.version, paid.version);

    let err = h
        .state
        .orders
        .create_payment_intent(&customer, &order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Conflict { .. }));
}

#[tokio::test]
async fn test_payment_intent_is_reused() {
    let h = harness();
    let order = h.place_example_order();
    let customer = Harness::customer();
    let first = h
        .state
        .orders
        .create_payment_intent(&customer, &order.order_id)
        .await
        .unwrap();
    let second = h
        .state
        .orders
        .create_payment_intent(&customer, &order.order_id)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.amount, Money::from_pence(766));
    assert_eq!(
        h.state.orders.find_by_intent(&first.id).unwrap().as_deref(),
        Some(order.order_id.as_str())
    );
}

#[tokio::test]
async fn test_pay_before_gateway_success_is_rejected() {
    let h = harness();
    let order = h.place_example_order();
    let customer = Harness::customer();
    h.state
        .orders
        .create_payment_intent(&customer, &order.order_id)
        .await
        .unwrap();
    let err = h.state.orders.pay(&customer, &order.order_id).await.unwrap_err();
    assert!(matches!(err, OrderError::Conflict { .. }));
    let unchanged = h.state.orders.get_order(&customer, &order.order_id).unwrap();
    assert_eq!(unchanged.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_cash_order_is_marked_paid_by_admin() {
    let h = harness();
    h.stock("rose", 5);
    let mut request = order_request(&[("rose", 1, 165)], FulfillmentType::Pickup);
    request.payment_method = PaymentMethod::Cash;
    let order = h
        .state
        .orders
        .create_order(&Harness::customer(), request)
        .unwrap();

    let err = h
        .state
        .orders
        .pay(&Harness::customer(), &order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Unauthorized(_)));

    let paid = h
        .state
        .orders
        .pay(&Harness::admin(), &order.order_id)
        .await
        .unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Completed);
    assert_eq!(h.gateway.retrieve_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn test_customers_only_see_their_orders() {
    let h = harness();
    let order = h.place_example_order();
    let stranger = shared::order::Actor::customer("cust-2");

    assert!(matches!(
        h.state.orders.get_order(&stranger, &order.order_id),
        Err(OrderError::Forbidden(_))
    ));
    assert!(h.state.orders.list_orders(&stranger, None, false).unwrap().is_empty());
    assert_eq!(
        h.state
            .orders
            .list_orders(&Harness::customer(), Some(OrderStatus::Pending), false)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_status_update_requires_admin() {
    let h = harness();
    let order = h.place_example_order();
    let err = h
        .state
        .orders
        .update_status(&Harness::customer(), &order.order_id, OrderStatus::Processing, None)
        .unwrap_err();
    assert!(matches!(err, OrderError::Unauthorized(_)));
}

#[test]
fn test_confirm_requires_payment() {
    let h = harness();
    let order = h.place_example_order();
    let err = h
        .state
        .orders
        .update_status(&Harness::admin(), &order.order_id, OrderStatus::Confirmed, None)
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::Conflict { code: ErrorCode::PaymentNotCompleted, .. }
    ));
}

#[test]
fn test_archived_order_rejects_transitions() {
    let h = harness();
    let order = h.place_example_order();
    let admin = Harness::admin();

    let err = h.state.orders.archive(&admin, &order.order_id).unwrap_err();
    assert!(matches!(err, OrderError::Conflict { .. }));

    h.state.orders.cancel(&admin, &order.order_id, None).unwrap();
    let archived = h.state.orders.archive(&admin, &order.order_id).unwrap();
    assert!(archived.is_archived());

    assert!(h
        .state
        .orders
        .list_orders(&admin, None, false)
        .unwrap()
        .is_empty());
    assert_eq!(h.state.orders.list_orders(&admin, None, true).unwrap().len(), 1);
}

#[test]
fn test_stock_adjustment_is_audited() {
    let h = harness();
    h.stock("rose", 7);
    let (entries, total) = h
        .state
        .orders
        .audit()
        .query(&storefront_server::audit::AuditQuery {
            target_id: Some("rose".into()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(entries[0].action, storefront_server::audit::AuditAction::StockAdjusted);
    assert!(h.state.orders.audit().verify_chain().unwrap().chain_intact);
}
