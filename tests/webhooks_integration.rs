use actix_web::http::header::ContentType;
use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;

use sapi_settlement::api::webhooks_multibank::{payment_webhook, sign_payload};

mod support;

async fn seed_subscription_tx(
    pool: &sqlx::PgPool,
    creator_share: i16,
) -> (i32, Uuid) {
    let suffix = Uuid::new_v4().to_string();
    let user_id = support::seed_user(pool, &suffix).await;
    let creator_id = support::seed_creator(pool, &suffix, creator_share).await;
    let card_id = support::seed_bound_card(pool, user_id).await;
    let plan_id = support::seed_plan(pool, creator_id, 50_000, Some(30)).await;

    // подписка в паузе после степ-апа
    let sub_id: i32 = sqlx::query(
        r#"INSERT INTO subscriptions
               (subscriber_id, creator_id, plan_id, card_id, end_date, is_active)
           VALUES ($1, $2, $3, $4, $5, FALSE)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(creator_id)
    .bind(plan_id)
    .bind(card_id)
    .bind(Utc::now() + Duration::days(30))
    .fetch_one(pool)
    .await
    .expect("insert subscription")
    .get("id");

    let tx_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO transactions
               (id, user_id, creator_id, amount, creator_amount, platform_amount,
                transaction_type, card_token, status, subscription_id)
           VALUES ($1, $2, $3, 5000000, 3900000, 1100000,
                   'subscription', 'tok', 'pending_confirmation', $4)"#,
    )
    .bind(tx_id)
    .bind(user_id)
    .bind(creator_id)
    .bind(sub_id)
    .execute(pool)
    .await
    .expect("insert transaction");

    (sub_id, tx_id)
}

fn signed_post(payload: &serde_json::Value) -> TestRequest {
    let body = serde_json::to_vec(payload).expect("serialize payload");
    let signature = sign_payload(support::TEST_WEBHOOK_SECRET, &body);
    TestRequest::post()
        .uri("/webhook/multibank/payment")
        .insert_header(("X-Signature", signature))
        .insert_header(ContentType::json())
        .set_payload(body)
}

#[actix_web::test]
async fn payment_webhook_success_flips_transaction_and_subscription() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let (sub_id, tx_id) = seed_subscription_tx(pool, 20).await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://localhost:1"));
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    let payload = json!({
        "invoice_id": tx_id.to_string(),
        "transaction_id": "mb-tx-777",
        "status": "success"
    });
    let resp = test::call_service(&app, signed_post(&payload).to_request()).await;
    assert!(resp.status().is_success());

    let tx_row = sqlx::query("SELECT status, provider_tx_id, callback_payload FROM transactions WHERE id = $1")
        .bind(tx_id)
        .fetch_one(pool)
        .await
        .expect("select tx");
    assert_eq!(tx_row.get::<String, _>("status"), "paid");
    assert_eq!(tx_row.get::<Option<String>, _>("provider_tx_id").as_deref(), Some("mb-tx-777"));
    // сырой вебхук сохранён для аудита
    assert!(tx_row.get::<Option<serde_json::Value>, _>("callback_payload").is_some());

    let sub_row = sqlx::query("SELECT is_active, payment_reference FROM subscriptions WHERE id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("select sub");
    assert!(sub_row.get::<bool, _>("is_active"));
    assert_eq!(
        sub_row.get::<Option<String>, _>("payment_reference").as_deref(),
        Some("mb-tx-777")
    );
}

#[actix_web::test]
async fn payment_webhook_replay_is_idempotent_for_donations() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().to_string();
    let user_id = support::seed_user(pool, &suffix).await;
    let creator_id = support::seed_creator(pool, &suffix, 20).await;

    let fundraising_id: i32 = sqlx::query(
        r#"INSERT INTO fundraisings (creator_id, title, goal, current_amount)
           VALUES ($1, 'Help', 100000000, 0)
           RETURNING id"#,
    )
    .bind(creator_id)
    .fetch_one(pool)
    .await
    .expect("insert fundraising")
    .get("id");

    let donation_id: i32 = sqlx::query(
        r#"INSERT INTO donations (donator_id, creator_id, fundraising_id, amount)
           VALUES ($1, $2, $3, 100000)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(creator_id)
    .bind(fundraising_id)
    .fetch_one(pool)
    .await
    .expect("insert donation")
    .get("id");

    let tx_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO transactions
               (id, user_id, creator_id, amount, creator_amount, platform_amount,
                transaction_type, card_token, status, donation_id)
           VALUES ($1, $2, $3, 100000, 78000, 22000,
                   'donation', 'tok', 'new', $4)"#,
    )
    .bind(tx_id)
    .bind(user_id)
    .bind(creator_id)
    .bind(donation_id)
    .execute(pool)
    .await
    .expect("insert transaction");

    let state = web::Data::new(support::build_state(pool.clone(), "http://localhost:1"));
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    let payload = json!({
        "invoice_id": tx_id.to_string(),
        "transaction_id": "mb-tx-888",
        "status": "success"
    });

    let resp = test::call_service(&app, signed_post(&payload).to_request()).await;
    assert!(resp.status().is_success());

    let first_amount: i64 = sqlx::query("SELECT current_amount FROM fundraisings WHERE id = $1")
        .bind(fundraising_id)
        .fetch_one(pool)
        .await
        .expect("select fundraising")
        .get("current_amount");
    assert_eq!(first_amount, 78_000);

    // повторная доставка того же вебхука: 200 и никаких новых эффектов
    let resp = test::call_service(&app, signed_post(&payload).to_request()).await;
    assert!(resp.status().is_success());

    let second_amount: i64 = sqlx::query("SELECT current_amount FROM fundraisings WHERE id = $1")
        .bind(fundraising_id)
        .fetch_one(pool)
        .await
        .expect("select fundraising")
        .get("current_amount");
    assert_eq!(second_amount, first_amount);

    let donation_active: bool = sqlx::query("SELECT is_active FROM donations WHERE id = $1")
        .bind(donation_id)
        .fetch_one(pool)
        .await
        .expect("select donation")
        .get("is_active");
    assert!(donation_active);
}

#[actix_web::test]
async fn payment_webhook_failure_statuses() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let (_, tx_id) = seed_subscription_tx(pool, 20).await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://localhost:1"));
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    // нет invoice_id -> 400
    let payload = json!({"status": "success"});
    let resp = test::call_service(&app, signed_post(&payload).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);

    // незнакомый invoice_id -> 404
    let payload = json!({"invoice_id": Uuid::new_v4().to_string(), "status": "success"});
    let resp = test::call_service(&app, signed_post(&payload).to_request()).await;
    assert_eq!(resp.status().as_u16(), 404);

    // плохая подпись -> 401, леджер не тронут
    let payload = json!({"invoice_id": tx_id.to_string(), "status": "success"});
    let body = serde_json::to_vec(&payload).expect("serialize");
    let req = TestRequest::post()
        .uri("/webhook/multibank/payment")
        .insert_header(("X-Signature", "deadbeef"))
        .insert_header(ContentType::json())
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);

    let status: String = sqlx::query("SELECT status FROM transactions WHERE id = $1")
        .bind(tx_id)
        .fetch_one(pool)
        .await
        .expect("select tx")
        .get("status");
    assert_eq!(status, "pending_confirmation");
}

#[actix_web::test]
async fn payment_webhook_failure_deactivates_linked_subscription() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let (sub_id, tx_id) = seed_subscription_tx(pool, 20).await;

    let state = web::Data::new(support::build_state(pool.clone(), "http://localhost:1"));
    let app = test::init_service(App::new().app_data(state.clone()).service(payment_webhook)).await;

    let payload = json!({
        "invoice_id": tx_id.to_string(),
        "status": "failed",
        "error": "otp expired"
    });
    let resp = test::call_service(&app, signed_post(&payload).to_request()).await;
    assert!(resp.status().is_success());

    let status: String = sqlx::query("SELECT status FROM transactions WHERE id = $1")
        .bind(tx_id)
        .fetch_one(pool)
        .await
        .expect("select tx")
        .get("status");
    assert_eq!(status, "failed");

    let active: bool = sqlx::query("SELECT is_active FROM subscriptions WHERE id = $1")
        .bind(sub_id)
        .fetch_one(pool)
        .await
        .expect("select sub")
        .get("is_active");
    assert!(!active);

    // и после failed успешный вебхук уже ничего не меняет (терминальность)
    let payload = json!({"invoice_id": tx_id.to_string(), "status": "success"});
    let resp = test::call_service(&app, signed_post(&payload).to_request()).await;
    assert!(resp.status().is_success());

    let status: String = sqlx::query("SELECT status FROM transactions WHERE id = $1")
        .bind(tx_id)
        .fetch_one(pool)
        .await
        .expect("select tx")
        .get("status");
    assert_eq!(status, "failed");
}
