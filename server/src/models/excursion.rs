use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExcursionStatus {
    Draft,
    Active,
    Full,
    Cancelled,
    Finished,
}

impl ExcursionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExcursionStatus::Draft => "DRAFT",
            ExcursionStatus::Active => "ACTIVE",
            ExcursionStatus::Full => "FULL",
            ExcursionStatus::Cancelled => "CANCELLED",
            ExcursionStatus::Finished => "FINISHED",
        }
    }

    /// Cancelled and finished excursions never reopen.
    pub fn is_closed(self) -> bool {
        matches!(self, ExcursionStatus::Cancelled | ExcursionStatus::Finished)
    }

    /// Active or full: the excursion is running and held seats are payable.
    pub fn is_open(self) -> bool {
        matches!(self, ExcursionStatus::Active | ExcursionStatus::Full)
    }
}

impl fmt::Display for ExcursionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExcursionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(ExcursionStatus::Draft),
            "ACTIVE" => Ok(ExcursionStatus::Active),
            "FULL" => Ok(ExcursionStatus::Full),
            "CANCELLED" => Ok(ExcursionStatus::Cancelled),
            "FINISHED" => Ok(ExcursionStatus::Finished),
            other => Err(ParseEnumError::new("excursion status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excursion {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub seats_total: i32,
    pub seats_occupied: i32,
    pub departure_at: DateTime<Utc>,
    pub price: Decimal,
    pub accepts_pix: bool,
    pub accepts_card: bool,
    pub status: ExcursionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Excursion {
    pub fn has_departed(&self, now: DateTime<Utc>) -> bool {
        self.departure_at <= now
    }
}

/// Organizer input for a new excursion. New excursions start as drafts.
#[derive(Debug, Clone, Deserialize)]
pub struct NewExcursion {
    pub title: String,
    pub seats_total: i32,
    pub departure_at: DateTime<Utc>,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub accepts_pix: bool,
    #[serde(default = "default_true")]
    pub accepts_card: bool,
}

fn default_true() -> bool {
    true
}

/// Partial organizer edit. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExcursionUpdate {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub seats_total: Option<i32>,
    pub accepts_pix: Option<bool>,
    pub accepts_card: Option<bool>,
}
