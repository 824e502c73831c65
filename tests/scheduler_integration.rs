use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sapi_settlement::scheduler::{renew_subscription, RenewalOutcome};

mod support;

async fn seed_due_subscription(pool: &sqlx::PgPool, duration_days: Option<i32>) -> (i32, i32, i32) {
    let suffix = Uuid::new_v4().to_string();
    let user_id = support::seed_user(pool, &suffix).await;
    let creator_id = support::seed_creator(pool, &suffix, 20).await;
    let card_id = support::seed_bound_card(pool, user_id).await;
    let plan_id = support::seed_plan(pool, creator_id, 50_000, duration_days).await;

    let sub_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (subscriber_id, creator_id, plan_id, card_id, end_date, is_active)
           VALUES ($1, $2, $3, $4, $5, TRUE)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(creator_id)
    .bind(plan_id)
    .bind(card_id)
    .bind(Utc::now() - Duration::days(1))
    .fetch_one(pool)
    .await
    .expect("insert subscription")
    .get("id");

    (sub_id, user_id, creator_id)
}

async fn mock_gateway_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/recipient"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"uuid": "rcpt-0001"}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/payment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"transaction_id": "mb-renew-1"}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/v1/payment/.+/confirm$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"status": "success"}
        })))
        .mount(server)
        .await;
}

// заблокированный создатель: подписка гасится без попытки списания
#[actix_web::test]
async fn blocked_relation_deactivates_without_charging() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let (sub_id, user_id, creator_id) = seed_due_subscription(pool, Some(30)).await;

    sqlx::query("INSERT INTO user_blocks (blocker_id, blocked_id) VALUES ($1, $2)")
        .bind(creator_id)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("insert block");

    // у шлюза нет моков: любой сетевой вызов здесь означал бы провал теста
    let state = support::build_state(pool.clone(), "http://localhost:1");
    let outcome = renew_subscription(pool, &state.orchestrator, sub_id)
        .await
        .expect("renew");
    assert_eq!(outcome, RenewalOutcome::DeactivatedBlocked);

    let active: bool = sqlx::query("SELECT is_active FROM subscriptions WHERE id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("select sub")
        .get("is_active");
    assert!(!active);

    let tx_count: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM transactions")
        .fetch_one(pool)
        .await
        .expect("count txs")
        .get("cnt");
    assert_eq!(tx_count, 0);
}

#[actix_web::test]
async fn successful_renewal_extends_end_date() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let server = MockServer::start().await;
    mock_gateway_success(&server).await;

    let (sub_id, _, _) = seed_due_subscription(pool, Some(30)).await;

    let state = support::build_state(pool.clone(), &server.uri());
    let before = Utc::now();
    let outcome = renew_subscription(pool, &state.orchestrator, sub_id)
        .await
        .expect("renew");
    let RenewalOutcome::Renewed { new_end_date } = outcome else {
        panic!("expected Renewed, got {outcome:?}");
    };

    // продление отсчитывается от момента списания, не от старого end_date
    assert!(new_end_date >= before + Duration::days(30));
    assert!(new_end_date <= Utc::now() + Duration::days(30));

    let row = sqlx::query(
        "SELECT end_date, is_active, payment_reference FROM subscriptions WHERE id = $1",
    )
    .bind(sub_id)
    .fetch_one(pool)
    .await
    .expect("select sub");
    assert!(row.get::<bool, _>("is_active"));
    assert_eq!(
        row.get::<Option<String>, _>("payment_reference").as_deref(),
        Some("mb-renew-1")
    );
    assert_eq!(row.get::<chrono::DateTime<Utc>, _>("end_date"), new_end_date);

    let tx_status: String = sqlx::query(
        "SELECT status FROM transactions WHERE subscription_id = $1",
    )
    .bind(sub_id)
    .fetch_one(pool)
    .await
    .expect("select tx")
    .get("status");
    assert_eq!(tx_status, "paid");
}

// транзиентный отказ шлюза не гасит подписку: ретрай в следующем цикле
#[actix_web::test]
async fn failed_renewal_keeps_subscription_active() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/recipient"))
        .respond_with(ResponseTemplate::new(500).set_body_string("multibank down"))
        .mount(&server)
        .await;

    let (sub_id, _, _) = seed_due_subscription(pool, Some(30)).await;

    let state = support::build_state(pool.clone(), &server.uri());
    let outcome = renew_subscription(pool, &state.orchestrator, sub_id)
        .await
        .expect("renew");
    assert!(matches!(outcome, RenewalOutcome::Failed(_)));

    let row = sqlx::query("SELECT is_active, end_date FROM subscriptions WHERE id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("select sub");
    assert!(row.get::<bool, _>("is_active"));
    assert!(row.get::<chrono::DateTime<Utc>, _>("end_date") < Utc::now());

    // попытка зафиксирована в леджере как failed
    let tx_status: String = sqlx::query("SELECT status FROM transactions WHERE subscription_id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("select tx")
        .get("status");
    assert_eq!(tx_status, "failed");
}

#[actix_web::test]
async fn not_due_subscription_is_skipped() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let (sub_id, _, _) = seed_due_subscription(pool, Some(30)).await;

    // подписку успели продлить/отменить до того, как сообщение дошло
    sqlx::query("UPDATE subscriptions SET end_date = NOW() + INTERVAL '10 days' WHERE id = $1")
        .bind(sub_id)
        .execute(pool)
        .await
        .expect("update sub");

    let state = support::build_state(pool.clone(), "http://localhost:1");
    let outcome = renew_subscription(pool, &state.orchestrator, sub_id)
        .await
        .expect("renew");
    assert_eq!(outcome, RenewalOutcome::NotDue);
}
