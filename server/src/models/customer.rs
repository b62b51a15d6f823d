use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payer identity as resolved from the customer directory.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub document: Option<String>,
    pub booking_blocked: bool,
}

impl Customer {
    pub fn new(id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            document: None,
            booking_blocked: false,
        }
    }

    /// First token of the display name, as payment gateways expect it.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or_default()
    }
}
