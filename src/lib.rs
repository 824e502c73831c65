pub mod api;
pub mod commission;
pub mod config;
pub mod db;
pub mod docs;
pub mod models;
pub mod orchestrator;
pub mod scheduler;

use sqlx::PgPool;

use crate::api::multibank_client::MultibankClient;
use crate::config::Settings;
use crate::orchestrator::PaymentOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub multibank: MultibankClient,
    pub orchestrator: PaymentOrchestrator,
    pub settings: Settings,
}

impl AppState {
    pub fn new(pool: PgPool, settings: Settings) -> AppState {
        let multibank = MultibankClient::new(
            &settings.multibank_base_url,
            &settings.multibank_api_key,
            settings.gateway_timeout_secs,
        );
        let orchestrator =
            PaymentOrchestrator::new(pool.clone(), multibank.clone(), settings.clone());
        AppState {
            pool,
            multibank,
            orchestrator,
            settings,
        }
    }
}
