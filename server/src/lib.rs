pub mod cache;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod identity;
pub mod inscriptions;
pub mod ledger;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod webhooks;
