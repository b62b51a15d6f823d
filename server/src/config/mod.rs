use std::env;
use std::str::FromStr;
use std::time::Duration;

pub mod cors;
pub mod security;

pub use cors::{create_cors_layer, CUSTOMER_ID_HEADER};
pub use security::create_security_headers_layer;

use crate::gateway::RetryPolicy;
use crate::payments::PaymentSettings;

/// Longest PIX window accepted from configuration (30 days).
pub const MAX_PIX_EXPIRY_MINUTES: i64 = 30 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    MercadoPago,
    Mock,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub store_backend: StoreBackend,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub gateway_kind: GatewayKind,
    pub mercadopago_base_url: String,
    pub mercadopago_access_token: String,
    pub webhook_public_url: String,
    pub gateway_timeout: Duration,
    pub gateway_max_attempts: u32,
    pub gateway_backoff: Duration,
    pub pix_expiry_minutes: i64,
    pub expiry_sweep_interval: Duration,
    pub notification_queue_capacity: usize,
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable values fall back to
    /// their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let store_backend = match text("STORE_BACKEND", "postgres").to_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres,
            other => {
                tracing::warn!("Config: unknown STORE_BACKEND '{}', using postgres", other);
                StoreBackend::Postgres
            }
        };

        let gateway_kind = match text("GATEWAY_KIND", "mercadopago").to_lowercase().as_str() {
            "mock" => GatewayKind::Mock,
            "mercadopago" => GatewayKind::MercadoPago,
            other => {
                tracing::warn!("Config: unknown GATEWAY_KIND '{}', using mercadopago", other);
                GatewayKind::MercadoPago
            }
        };

        Self {
            database_url: text("DATABASE_URL", "postgres://localhost/tourapp"),
            store_backend,
            bind_addr: text("BIND_ADDR", "0.0.0.0:3001"),
            db_max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 5),
            gateway_kind,
            mercadopago_base_url: text("MERCADOPAGO_BASE_URL", "https://api.mercadopago.com"),
            mercadopago_access_token: text("MERCADOPAGO_ACCESS_TOKEN", ""),
            webhook_public_url: text(
                "WEBHOOK_PUBLIC_URL",
                "http://localhost:3001/webhook/mercadopago",
            ),
            gateway_timeout: Duration::from_millis(parsed(&lookup, "GATEWAY_TIMEOUT_MS", 10_000)),
            gateway_max_attempts: parsed(&lookup, "GATEWAY_MAX_ATTEMPTS", 3),
            gateway_backoff: Duration::from_millis(parsed(&lookup, "GATEWAY_BACKOFF_MS", 200)),
            pix_expiry_minutes: parsed(&lookup, "PIX_EXPIRY_MINUTES", 30i64)
                .clamp(1, MAX_PIX_EXPIRY_MINUTES),
            expiry_sweep_interval: Duration::from_secs(
                parsed(&lookup, "EXPIRY_SWEEP_INTERVAL_SECS", 60u64).max(1),
            ),
            notification_queue_capacity: parsed(&lookup, "NOTIFICATION_QUEUE_CAPACITY", 1024),
            cors_allowed_origins: text("CORS_ALLOWED_ORIGINS", cors::DEFAULT_ALLOWED_ORIGINS),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.gateway_max_attempts,
            initial_backoff: self.gateway_backoff,
            call_timeout: self.gateway_timeout,
        }
    }

    pub fn payment_settings(&self) -> PaymentSettings {
        PaymentSettings {
            pix_expiry: chrono::Duration::minutes(self.pix_expiry_minutes),
            notification_url: self.webhook_public_url.clone(),
            retry: self.retry_policy(),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Config: invalid {} '{}', using {}", key, raw, default);
            default
        }),
    }
}
