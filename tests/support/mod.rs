use sqlx::{PgPool, Row};
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use sapi_settlement::config::Settings;
use sapi_settlement::AppState;

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

pub async fn init_test_db() -> TestDb {
    dotenvy::dotenv().ok();
    let test_url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let (admin_url, db_name) = split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url).await.expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    let create_result = sqlx::query(&create_sql).execute(&admin_pool).await;
    if let Err(e) = create_result {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    TestDb { pool, _guard: guard }
}

pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

pub fn test_settings(multibank_base_url: &str) -> Settings {
    Settings {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: "unused".to_string(),
        multibank_base_url: multibank_base_url.to_string(),
        multibank_api_key: "test-multibank".to_string(),
        multibank_store_id: 6,
        platform_receiver_id: "7bd7ad8e-b2d5-11ee-97a8-005056b4367d".to_string(),
        bank_mfo: "00491".to_string(),
        callback_base_url: "http://localhost".to_string(),
        webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        gateway_timeout_secs: 5,
        jwt_secret: "test-jwt".to_string(),
        resubscribe_interval_secs: 60,
        resubscribe_batch_size: 50,
        rabbitmq_url: None,
    }
}

pub fn build_state(pool: PgPool, multibank_base_url: &str) -> AppState {
    AppState::new(pool, test_settings(multibank_base_url))
}

// ---------------------------------------------------------------------------
// seed helpers

pub async fn seed_user(pool: &PgPool, suffix: &str) -> i32 {
    sqlx::query(
        r#"INSERT INTO users (phone_number, username)
           VALUES ($1, $2)
           RETURNING id"#,
    )
    .bind(format!("+99890{}", &suffix[..7.min(suffix.len())]))
    .bind(format!("user_{suffix}"))
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

pub async fn seed_creator(pool: &PgPool, suffix: &str, sapi_share: i16) -> i32 {
    sqlx::query(
        r#"INSERT INTO users
               (phone_number, username, is_creator, sapi_share, pinfl,
                multibank_account, multibank_verified)
           VALUES ($1, $2, TRUE, $3, '12345678901234', '20208000900000000001', TRUE)
           RETURNING id"#,
    )
    .bind(format!("+99891{}", &suffix[..7.min(suffix.len())]))
    .bind(format!("creator_{suffix}"))
    .bind(sapi_share)
    .fetch_one(pool)
    .await
    .expect("insert creator")
    .get("id")
}

pub async fn seed_bound_card(pool: &PgPool, user_id: i32) -> i32 {
    sqlx::query(
        r#"INSERT INTO cards (user_id, number, card_owner, token, type, is_active)
           VALUES ($1, '860012******1234', 'TEST HOLDER', $2, 'uzcard', TRUE)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(Uuid::new_v4().to_string())
    .fetch_one(pool)
    .await
    .expect("insert card")
    .get("id")
}

pub async fn seed_plan(
    pool: &PgPool,
    creator_id: i32,
    price: i64,
    duration_days: Option<i32>,
) -> i32 {
    sqlx::query(
        r#"INSERT INTO subscription_plans (creator_id, name, price, duration_days)
           VALUES ($1, 'Test plan', $2, $3)
           RETURNING id"#,
    )
    .bind(creator_id)
    .bind(price)
    .bind(duration_days)
    .fetch_one(pool)
    .await
    .expect("insert plan")
    .get("id")
}
