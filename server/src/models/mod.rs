pub mod customer;
pub mod excursion;
pub mod inscription;
pub mod payment;

pub use customer::Customer;
pub use excursion::{Excursion, ExcursionStatus, ExcursionUpdate, NewExcursion};
pub use inscription::Inscription;
pub use payment::{Payment, PaymentMethod, PaymentStatus};

use thiserror::Error;

/// Raised when a persisted enum column holds a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
