#![allow(dead_code)]

use async_trait::async_trait;
use shared::order::{Actor, FulfillmentType, Money, Order, PaymentMethod};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use storefront_server::core::{Config, ServerState};
use storefront_server::db::Storage;
use storefront_server::orders::{
    CreateOrderRequest, CustomerInput, DeliveryAddressInput, LineItemInput,
};
use storefront_server::payments::{
    CreateIntentRequest, CreateRefundRequest, GatewayError, GatewayErrorKind, GatewayRefund,
    GatewayRefundStatus, IntentStatus, PaymentGateway, PaymentIntent, sign_payload,
};

/// In-process gateway that records every call
pub struct FakeGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    intent_keys: Mutex<HashMap<String, String>>,
    pub intent_calls: AtomicUsize,
    pub retrieve_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub refunds: Mutex<Vec<CreateRefundRequest>>,
    pub fail_refunds: AtomicBool,
    /// Refund calls time out after the gateway recorded them
    pub refund_outage: AtomicBool,
    pub refund_status: Mutex<GatewayRefundStatus>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(HashMap::new()),
            intent_keys: Mutex::new(HashMap::new()),
            intent_calls: AtomicUsize::new(0),
            retrieve_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
            fail_refunds: AtomicBool::new(false),
            refund_outage: AtomicBool::new(false),
            refund_status: Mutex::new(GatewayRefundStatus::Pending),
        }
    }

    /// Mark an intent as paid, as the browser flow would
    pub fn succeed(&self, intent_id: &str) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(intent_id) {
            intent.status = IntentStatus::Succeeded;
        }
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let n = self.intent_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut keys = self.intent_keys.lock().unwrap();
        let mut intents = self.intents.lock().unwrap();
        if let Some(id) = keys.get(&request.idempotency_key) {
            return Ok(intents[id].clone());
        }
        let id = format!("pi_test_{}", n);
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: Some(format!("{}_secret", id)),
            status: IntentStatus::RequiresPaymentMethod,
            amount: request.amount,
            order_id: Some(request.order_id.clone()),
            last_error: None,
        };
        keys.insert(request.idempotency_key.clone(), id.clone());
        intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| {
                GatewayError::new(GatewayErrorKind::InvalidRequest, "no such intent", "test")
            })
    }

    async fn create_refund(
        &self,
        request: &CreateRefundRequest,
    ) -> Result<GatewayRefund, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.refunds.lock().unwrap().push(request.clone());
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::new(
                GatewayErrorKind::CardDeclined,
                "charge already disputed",
                "test-correlation",
            ));
        }
        if self.refund_outage.load(Ordering::SeqCst) {
            return Err(GatewayError::new(
                GatewayErrorKind::Timeout,
                "request timed out",
                "test-correlation",
            ));
        }
        Ok(GatewayRefund {
            id: format!("re_{}", request.refund_id),
            status: *self.refund_status.lock().unwrap(),
            failure_reason: None,
        })
    }
}

pub struct Harness {
    pub state: ServerState,
    pub gateway: Arc<FakeGateway>,
}

impl Harness {
    pub fn admin() -> Actor {
        Actor::admin("admin-1")
    }

    pub fn customer() -> Actor {
        Actor::customer("cust-1")
    }

    pub fn stock(&self, product_id: &str, quantity: u64) {
        self.state
            .orders
            .set_stock(&Self::admin(), product_id, quantity)
            .unwrap();
    }

    pub fn stock_of(&self, product_id: &str) -> u64 {
        self.state.orders.stock(product_id).unwrap()
    }

    pub fn outbox_len(&self) -> u64 {
        self.state.outbox.pending_count().unwrap()
    }

    /// The £7.66 basket: 2 × £1.65 roses + 1 × £1.00 card, delivered
    pub fn place_example_order(&self) -> Order {
        self.stock("rose", 10);
        self.stock("card", 10);
        self.state
            .orders
            .create_order(
                &Self::customer(),
                order_request(&[("rose", 2, 165), ("card", 1, 100)], FulfillmentType::Delivery),
            )
            .unwrap()
    }

    /// Create an intent and complete it at the gateway
    pub async fn pay_at_gateway(&self, order_id: &str) -> String {
        let intent = self
            .state
            .orders
            .create_payment_intent(&Self::customer(), order_id)
            .await
            .unwrap();
        self.gateway.succeed(&intent.id);
        intent.id
    }

    /// A signed webhook delivery: body bytes and signature header
    pub fn signed(&self, event: &serde_json::Value) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(event).unwrap();
        let now = shared::util::now_millis() / 1000;
        let header = sign_payload(&body, &self.state.config.webhook_secret, now);
        (body, header)
    }
}

pub fn harness() -> Harness {
    let config = Config::from_source(|_| None).unwrap();
    let storage = Storage::open_in_memory().unwrap();
    let gateway = Arc::new(FakeGateway::new());
    let state = ServerState::build(config, storage, gateway.clone());
    Harness { state, gateway }
}

pub fn order_request(lines: &[(&str, u32, i64)], fulfillment: FulfillmentType) -> CreateOrderRequest {
    CreateOrderRequest {
        items: lines
            .iter()
            .map(|(product_id, quantity, pence)| LineItemInput {
                product_id: product_id.to_string(),
                name: product_id.to_string(),
                quantity: *quantity,
                unit_price: Money::from_pence(*pence),
            })
            .collect(),
        fulfillment,
        delivery_address: match fulfillment {
            FulfillmentType::Delivery => Some(DeliveryAddressInput {
                street: "1 Rose Lane".into(),
                city: "London".into(),
                postcode: "sw1a 1aa".into(),
            }),
            FulfillmentType::Pickup => None,
        },
        payment_method: PaymentMethod::Stripe,
        customer: CustomerInput {
            name: "Ada Customer".into(),
            email: "Ada@Example.com".into(),
            phone: "+44 20 7946 0958".into(),
        },
        order_notes: None,
        priority: Default::default(),
        source: Default::default(),
        discount: Money::ZERO,
        customer_id: Some("cust-1".into()),
    }
}

pub fn payment_succeeded(event_id: &str, intent_id: &str, order_id: &str, pence: i64) -> serde_json::Value {
    serde_json::json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "created": 1_700_000_000,
        "data": { "object": {
            "id": intent_id,
            "amount": pence,
            "metadata": { "order_id": order_id }
        }}
    })
}
