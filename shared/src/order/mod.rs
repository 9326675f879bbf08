//! Order aggregate types
//!
//! The aggregate itself is plain data; transition rules live in the server's
//! state machine.

mod money;
mod types;

pub use money::{DECIMAL_PLACES, Money};
pub use types::*;
