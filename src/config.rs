// src/config.rs

use std::env;

/// Все процессные константы сервиса в одном месте. Платёжные реквизиты
/// платформы (receiver uuid, МФО банка, store_id) раньше жили литералами в
/// коде интеграции — теперь только здесь, через окружение.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,

    pub multibank_base_url: String,
    pub multibank_api_key: String,
    pub multibank_store_id: i64,
    /// UUID расчётного счёта платформы у провайдера (вторая нога сплита).
    pub platform_receiver_id: String,
    /// МФО банка для резолва получателя выплат.
    pub bank_mfo: String,

    pub callback_base_url: String,
    pub webhook_secret: String,
    pub gateway_timeout_secs: u64,

    pub jwt_secret: String,

    pub resubscribe_interval_secs: u64,
    pub resubscribe_batch_size: i64,
    pub rabbitmq_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Settings {
        Settings {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8070".to_string()),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),

            multibank_base_url: env::var("MULTIBANK_BASE_URL")
                .unwrap_or_else(|_| "https://api.multibank.uz".to_string()),
            multibank_api_key: env::var("MULTIBANK_API_KEY").expect("MULTIBANK_API_KEY required"),
            multibank_store_id: env::var("MULTIBANK_STORE_ID")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(6),
            platform_receiver_id: env::var("PLATFORM_RECEIVER_ID")
                .expect("PLATFORM_RECEIVER_ID required"),
            bank_mfo: env::var("BANK_MFO").unwrap_or_else(|_| "00491".to_string()),

            callback_base_url: env::var("CALLBACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.sapi.uz".to_string()),
            webhook_secret: env::var("MULTIBANK_WEBHOOK_SECRET")
                .expect("MULTIBANK_WEBHOOK_SECRET required"),
            gateway_timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET required"),

            // дефолт — дважды в сутки, как у celery-бита в старом бэкенде
            resubscribe_interval_secs: env::var("RESUBSCRIBE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(43_200),
            resubscribe_batch_size: env::var("RESUBSCRIBE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(200),
            rabbitmq_url: env::var("RABBITMQ_URL").ok(),
        }
    }
}
