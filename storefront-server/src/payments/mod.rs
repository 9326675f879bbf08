//! Payment gateway integration

mod gateway;
pub mod signature;
mod stripe;

pub use gateway::{
    CreateIntentRequest, CreateRefundRequest, GatewayError, GatewayErrorKind, GatewayRefund,
    GatewayRefundStatus, IntentStatus, PaymentGateway, PaymentIntent,
};
pub use signature::{SIGNATURE_HEADER, SignatureError, sign_payload, verify_signature};
pub use stripe::{StripeConfig, StripeGateway};
