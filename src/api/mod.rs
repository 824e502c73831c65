pub mod auth;
pub mod cards;
pub mod donations;
pub mod multibank_client;
pub mod plans;
pub mod subscriptions;
pub mod transactions;
pub mod webhooks_multibank;
