use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use std::fmt;

use super::PaymentError;

pub const MAX_INSTALLMENTS: u8 = 12;

/// Card data as submitted at checkout. `token` is the gateway-side card token
/// produced by the checkout frontend; the raw fields are only checked locally.
#[derive(Clone, Deserialize)]
pub struct CardDetails {
    pub holder_name: String,
    pub number: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub cvv: String,
    pub installments: u8,
    pub token: String,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("holder_name", &self.holder_name)
            .field("number", &format_args!("****{}", last_four(&self.number)))
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .field("installments", &self.installments)
            .finish_non_exhaustive()
    }
}

/// Card fields that passed local validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCard {
    pub brand: &'static str,
    pub last_four: String,
    pub installments: u8,
    pub token: String,
}

impl CardDetails {
    /// Checks every field without touching the network.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<ValidatedCard, PaymentError> {
        if self.holder_name.trim().is_empty() {
            return Err(invalid("card holder name is required"));
        }

        if !(1..=MAX_INSTALLMENTS).contains(&self.installments) {
            return Err(invalid("installments must be between 1 and 12"));
        }

        let number: String = self.number.chars().filter(|c| !c.is_whitespace()).collect();
        if !number.chars().all(|c| c.is_ascii_digit()) || !(13..=19).contains(&number.len()) {
            return Err(invalid("invalid card number"));
        }

        let cvv = self.cvv.trim();
        if !cvv.chars().all(|c| c.is_ascii_digit()) || !(3..=4).contains(&cvv.len()) {
            return Err(invalid("invalid CVV"));
        }

        if !(1..=12).contains(&self.expiry_month) {
            return Err(invalid("invalid expiry month"));
        }
        // A card is valid through the last day of its expiry month.
        if (self.expiry_year, self.expiry_month) < (now.year(), now.month()) {
            return Err(invalid("card expired"));
        }

        if self.token.trim().is_empty() {
            return Err(invalid("card token is required"));
        }

        Ok(ValidatedCard {
            brand: detect_brand(&number),
            last_four: last_four(&number).to_string(),
            installments: self.installments,
            token: self.token.trim().to_string(),
        })
    }
}

fn invalid(message: &str) -> PaymentError {
    PaymentError::Validation(message.to_string())
}

fn last_four(number: &str) -> &str {
    let start = number.len().saturating_sub(4);
    number.get(start..).unwrap_or_default()
}

/// Gateway payment method id from the card number prefix.
pub fn detect_brand(number: &str) -> &'static str {
    match number.chars().next() {
        Some('4') => "visa",
        Some('5') | Some('2') => "master",
        Some('3') => "amex",
        Some('6') => "elo",
        _ => "visa",
    }
}
