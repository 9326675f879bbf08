mod common;

use common::{Harness, harness, order_request};
use shared::order::{FulfillmentType, OrderStatus};
use shared::refund::RefundReason;
use std::collections::HashSet;
use std::sync::Barrier;
use storefront_server::OrderError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_never_oversell() {
    let h = harness();
    h.stock("rose", 5);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let state = h.state.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            state.orders.create_order(
                &Harness::customer(),
                order_request(&[("rose", 1, 165)], FulfillmentType::Pickup),
            )
        }));
    }

    let mut placed = Vec::new();
    let mut short = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => placed.push(order.order_id),
            Err(OrderError::InsufficientStock { available: 0, .. }) => short += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(placed.len(), 5);
    assert_eq!(short, 5);
    assert_eq!(h.stock_of("rose"), 0);
    let unique: HashSet<_> = placed.iter().collect();
    assert_eq!(unique.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancels_release_stock_once() {
    let h = harness();
    let order = h.place_example_order();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = h.state.clone();
        let order_id = order.order_id.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            state.orders.cancel(&Harness::customer(), &order_id, None)
        }));
    }
    for handle in handles {
        let cancelled = handle.await.unwrap().unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
    }

    assert_eq!(h.stock_of("rose"), 10);
    assert_eq!(h.stock_of("card"), 10);
    let after = h.state.orders.get_order(&Harness::admin(), &order.order_id).unwrap();
    assert_eq!(after.status_history.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_payment_settles_consistently() {
    let h = harness();
    let order = h.place_example_order();
    let intent_id = h.pay_at_gateway(&order.order_id).await;

    let cancel = {
        let state = h.state.clone();
        let order_id = order.order_id.clone();
        tokio::task::spawn_blocking(move || {
            state.orders.cancel(&Harness::customer(), &order_id, None)
        })
    };
    let confirm = {
        let state = h.state.clone();
        let order_id = order.order_id.clone();
        tokio::task::spawn_blocking(move || {
            state.orders.confirm_payment(
                &order_id,
                Some(&intent_id),
                &shared::order::Actor::system(),
                "payment_intent.succeeded",
            )
        })
    };
    cancel.await.unwrap().unwrap();
    confirm.await.unwrap().unwrap();

    // Whichever won, the order ends cancelled and paid with a refund open
    let after = h.state.orders.get_order(&Harness::admin(), &order.order_id).unwrap();
    assert_eq!(after.status, OrderStatus::Cancelled);
    assert!(after.is_paid());
    assert_eq!(h.stock_of("rose"), 10);
    let refunds = h
        .state
        .orders
        .refunds()
        .list_for_order(&Harness::admin(), &order.order_id)
        .unwrap();
    assert_eq!(refunds.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_automatic_refunds_open_exactly_one() {
    for _ in 0..20 {
        let h = harness();
        let order = h.place_example_order();
        h.pay_at_gateway(&order.order_id).await;
        let paid = h.state.orders.pay(&Harness::customer(), &order.order_id).await.unwrap();

        let barrier = Barrier::new(2);
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let state = h.state.clone();
                    let (barrier, paid) = (&barrier, &paid);
                    scope.spawn(move || {
                        barrier.wait();
                        state.orders.refunds().open_full_refund_for(
                            paid,
                            RefundReason::Other,
                            "Order cancelled after payment",
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        let opened = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(opened, 1);
        let refunds = h
            .state
            .orders
            .refunds()
            .list_for_order(&Harness::admin(), &order.order_id)
            .unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, paid.amounts.final_amount);
    }
}
