use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PaymentStatus;

/// A customer's booking: one held seat plus the obligation to pay for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inscription {
    pub id: Uuid,
    pub excursion_id: Uuid,
    pub customer_id: Uuid,
    pub amount_due: Decimal,
    pub payment_status: PaymentStatus,
    pub customer_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inscription {
    /// Only cancelled bookings free the (customer, excursion) pair for a new booking.
    pub fn holds_booking_slot(&self) -> bool {
        self.payment_status != PaymentStatus::Cancelled
    }
}
