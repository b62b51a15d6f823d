use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseEnumError;

/// Settlement state shared by inscriptions and payment attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Rejected => "REJECTED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Whether a payment sitting at `self` may be moved to `next`. Terminal
    /// statuses are final except for refunding an approved payment.
    pub fn can_move_to(self, next: PaymentStatus) -> bool {
        if self == next {
            return false;
        }
        !self.is_terminal() || (self, next) == (PaymentStatus::Approved, PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "APPROVED" => Ok(PaymentStatus::Approved),
            "REJECTED" => Ok(PaymentStatus::Rejected),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(ParseEnumError::new("payment status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Pix,
    Card,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Pix => "PIX",
            PaymentMethod::Card => "CARD",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PIX" => Ok(PaymentMethod::Pix),
            "CARD" => Ok(PaymentMethod::Card),
            other => Err(ParseEnumError::new("payment method", other)),
        }
    }
}

/// One attempt at settling an inscription through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub inscription_id: Uuid,
    pub method: PaymentMethod,
    pub external_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub installments: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
    pub notes: String,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Moves the payment to `next` when [`PaymentStatus::can_move_to`] allows it.
    /// Returns whether anything was written.
    pub fn advance(&mut self, next: PaymentStatus, reason: &str, now: DateTime<Utc>) -> bool {
        if !self.status.can_move_to(next) {
            return false;
        }

        let entry = format!("status changed from {} to {} {}", self.status, next, reason);
        if self.notes.is_empty() {
            self.notes = entry;
        } else {
            self.notes = format!("{} | {}", self.notes, entry);
        }
        self.status = next;
        self.processed_at = Some(now);
        self.updated_at = now;
        true
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
