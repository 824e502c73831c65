// src/db.rs
//
// Леджер и доменные запросы. Все переходы статуса транзакции — условные
// UPDATE c guard'ом по текущему статусу: проигравший гонку видит
// rows_affected == 0 и не применяет побочные эффекты.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Card, Creator, Donation, Fundraising, LinkedEntity, Subscription, SubscriptionPlan,
    Transaction, TxStatus,
};

// ---------------------------------------------------------------------------
// users / cards

pub async fn get_creator(pool: &PgPool, user_id: i32) -> Result<Option<Creator>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, is_creator, sapi_share, pinfl, multibank_account, multibank_verified,
                  minimum_message_donation, max_donation_letters
           FROM users
           WHERE id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Creator {
        id: r.get("id"),
        is_creator: r.get("is_creator"),
        sapi_share: r.get("sapi_share"),
        pinfl: r.get("pinfl"),
        multibank_account: r.get("multibank_account"),
        multibank_verified: r.get("multibank_verified"),
        minimum_message_donation: r.get("minimum_message_donation"),
        max_donation_letters: r.get("max_donation_letters"),
    }))
}

pub async fn get_user_phone(pool: &PgPool, user_id: i32) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT phone_number FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("phone_number")))
}

/// Блокировка в любую сторону между подписчиком и создателем.
pub async fn users_blocked(pool: &PgPool, a: i32, b: i32) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT 1 AS found FROM user_blocks
           WHERE (blocker_id = $1 AND blocked_id = $2)
              OR (blocker_id = $2 AND blocked_id = $1)
           LIMIT 1"#,
    )
    .bind(a)
    .bind(b)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

fn row_to_card(r: &PgRow) -> Card {
    Card {
        id: r.get("id"),
        user_id: r.get("user_id"),
        number: r.get("number"),
        card_owner: r.get("card_owner"),
        token: r.get("token"),
        card_type: r.get("type"),
        is_active: r.get("is_active"),
        is_deleted: r.get("is_deleted"),
        created_at: r.get("created_at"),
    }
}

const CARD_COLUMNS: &str =
    "id, user_id, number, card_owner, token, type, is_active, is_deleted, created_at";

pub async fn get_card(pool: &PgPool, card_id: i32) -> Result<Option<Card>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {CARD_COLUMNS} FROM cards WHERE id = $1 AND NOT is_deleted"
    ))
    .bind(card_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| row_to_card(&r)))
}

pub async fn list_user_cards(pool: &PgPool, user_id: i32) -> Result<Vec<Card>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {CARD_COLUMNS} FROM cards
         WHERE user_id = $1 AND NOT is_deleted
         ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_card).collect())
}

/// Заготовка карты до привязки: активируется только вебхуком bind-card.
pub async fn insert_pending_card(
    pool: &PgPool,
    user_id: i32,
    session_id: &str,
) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO cards (user_id, multibank_session_id, is_active)
           VALUES ($1, $2, FALSE)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(session_id)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

/// Карта, которую ждёт вебхук привязки: матчим по session id провайдера
/// и телефону владельца.
pub async fn find_card_for_binding(
    pool: &PgPool,
    session_id: &str,
    phone: &str,
) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT c.id FROM cards c
           JOIN users u ON u.id = c.user_id
           WHERE c.multibank_session_id = $1
             AND u.phone_number = $2
             AND NOT c.is_deleted
           ORDER BY c.created_at DESC
           LIMIT 1"#,
    )
    .bind(session_id)
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("id")))
}

pub async fn bind_card(
    pool: &PgPool,
    card_id: i32,
    number: &str,
    card_owner: &str,
    token: &str,
    card_type: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE cards
           SET number = $2, card_owner = $3, token = $4,
               type = COALESCE($5, type), is_active = TRUE
           WHERE id = $1"#,
    )
    .bind(card_id)
    .bind(number)
    .bind(card_owner)
    .bind(token)
    .bind(card_type)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn soft_delete_card(pool: &PgPool, card_id: i32, user_id: i32) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE cards SET is_deleted = TRUE, is_active = FALSE
           WHERE id = $1 AND user_id = $2 AND NOT is_deleted"#,
    )
    .bind(card_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// plans / subscriptions

fn row_to_plan(r: &PgRow) -> SubscriptionPlan {
    SubscriptionPlan {
        id: r.get("id"),
        creator_id: r.get("creator_id"),
        name: r.get("name"),
        description: r.get("description"),
        price: r.get("price"),
        duration_days: r.get("duration_days"),
        is_active: r.get("is_active"),
        created_at: r.get("created_at"),
    }
}

pub async fn get_plan(pool: &PgPool, plan_id: i32) -> Result<Option<SubscriptionPlan>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, creator_id, name, description, price, duration_days, is_active, created_at
           FROM subscription_plans
           WHERE id = $1 AND NOT is_deleted"#,
    )
    .bind(plan_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| row_to_plan(&r)))
}

pub async fn list_creator_plans(
    pool: &PgPool,
    creator_id: i32,
) -> Result<Vec<SubscriptionPlan>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, creator_id, name, description, price, duration_days, is_active, created_at
           FROM subscription_plans
           WHERE creator_id = $1 AND is_active AND NOT is_deleted
           ORDER BY price ASC"#,
    )
    .bind(creator_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_plan).collect())
}

fn row_to_subscription(r: &PgRow) -> Subscription {
    Subscription {
        id: r.get("id"),
        subscriber_id: r.get("subscriber_id"),
        creator_id: r.get("creator_id"),
        plan_id: r.get("plan_id"),
        card_id: r.get("card_id"),
        commission_by_subscriber: r.get("commission_by_subscriber"),
        one_time: r.get("one_time"),
        start_date: r.get("start_date"),
        end_date: r.get("end_date"),
        is_active: r.get("is_active"),
        payment_reference: r.get("payment_reference"),
        created_at: r.get("created_at"),
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, subscriber_id, creator_id, plan_id, card_id, \
     commission_by_subscriber, one_time, start_date, end_date, is_active, \
     payment_reference, created_at";

pub async fn get_subscription(
    pool: &PgPool,
    id: i32,
) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| row_to_subscription(&r)))
}

pub async fn list_user_subscriptions(
    pool: &PgPool,
    user_id: i32,
) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE subscriber_id = $1
         ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_subscription).collect())
}

/// Непросроченная живая подписка на этот тариф уже есть?
pub async fn has_overlapping_subscription(
    pool: &PgPool,
    subscriber_id: i32,
    plan_id: i32,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT 1 AS found FROM subscriptions
           WHERE subscriber_id = $1 AND plan_id = $2
             AND is_active AND end_date >= NOW()
           LIMIT 1"#,
    )
    .bind(subscriber_id)
    .bind(plan_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Вставка под частичным уникальным индексом (subscriber_id, plan_id) WHERE
/// is_active — гонку двух одновременных покупок решает БД, не пре-чек.
pub async fn insert_subscription(
    pool: &PgPool,
    subscriber_id: i32,
    creator_id: i32,
    plan_id: i32,
    card_id: i32,
    commission_by_subscriber: bool,
    one_time: bool,
    end_date: DateTime<Utc>,
) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO subscriptions
               (subscriber_id, creator_id, plan_id, card_id,
                commission_by_subscriber, one_time, end_date)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING id"#,
    )
    .bind(subscriber_id)
    .bind(creator_id)
    .bind(plan_id)
    .bind(card_id)
    .bind(commission_by_subscriber)
    .bind(one_time)
    .bind(end_date)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

pub async fn cancel_subscription(
    pool: &PgPool,
    subscription_id: i32,
    subscriber_id: i32,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let row = sqlx::query(
        r#"UPDATE subscriptions SET is_active = FALSE
           WHERE id = $1 AND subscriber_id = $2
           RETURNING end_date"#,
    )
    .bind(subscription_id)
    .bind(subscriber_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("end_date")))
}

pub async fn deactivate_subscription(pool: &PgPool, subscription_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE subscriptions SET is_active = FALSE WHERE id = $1")
        .bind(subscription_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Продление после успешного списания — единственный путь, которым
/// двигается end_date.
pub async fn extend_subscription(
    pool: &PgPool,
    subscription_id: i32,
    new_end_date: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE subscriptions SET end_date = $2, is_active = TRUE
           WHERE id = $1"#,
    )
    .bind(subscription_id)
    .bind(new_end_date)
    .execute(pool)
    .await?;
    Ok(())
}

/// Кандидаты на автопродление: активные, не разовые, с истёкшим периодом.
pub async fn due_subscription_ids(pool: &PgPool, limit: i64) -> Result<Vec<i32>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id FROM subscriptions
           WHERE is_active AND NOT one_time AND end_date < NOW()
           ORDER BY end_date ASC
           LIMIT $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

// ---------------------------------------------------------------------------
// donations / fundraisings

pub async fn insert_donation(
    pool: &PgPool,
    donator_id: i32,
    creator_id: i32,
    fundraising_id: Option<i32>,
    amount: i64,
    message: Option<&str>,
    commission_by_subscriber: bool,
) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO donations
               (donator_id, creator_id, fundraising_id, amount, message, commission_by_subscriber)
           VALUES ($1, $2, $3, $4, $5, $6)
           RETURNING id"#,
    )
    .bind(donator_id)
    .bind(creator_id)
    .bind(fundraising_id)
    .bind(amount)
    .bind(message)
    .bind(commission_by_subscriber)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

/// Подтверждённые донаты создателя, свежие сверху.
pub async fn list_creator_donations(
    pool: &PgPool,
    creator_id: i32,
) -> Result<Vec<Donation>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, donator_id, creator_id, fundraising_id, amount, message,
                  commission_by_subscriber, is_active, payment_reference, created_at
           FROM donations
           WHERE creator_id = $1 AND is_active
           ORDER BY created_at DESC"#,
    )
    .bind(creator_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| Donation {
            id: r.get("id"),
            donator_id: r.get("donator_id"),
            creator_id: r.get("creator_id"),
            fundraising_id: r.get("fundraising_id"),
            amount: r.get("amount"),
            message: r.get("message"),
            commission_by_subscriber: r.get("commission_by_subscriber"),
            is_active: r.get("is_active"),
            payment_reference: r.get("payment_reference"),
            created_at: r.get("created_at"),
        })
        .collect())
}

pub async fn deactivate_donation(pool: &PgPool, donation_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE donations SET is_active = FALSE WHERE id = $1")
        .bind(donation_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_fundraising(
    pool: &PgPool,
    id: i32,
) -> Result<Option<Fundraising>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, creator_id, title, goal, deadline, minimum_donation,
                  current_amount, is_active
           FROM fundraisings
           WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| Fundraising {
        id: r.get("id"),
        creator_id: r.get("creator_id"),
        title: r.get("title"),
        goal: r.get("goal"),
        deadline: r.get("deadline"),
        minimum_donation: r.get("minimum_donation"),
        current_amount: r.get("current_amount"),
        is_active: r.get("is_active"),
    }))
}

// ---------------------------------------------------------------------------
// transaction ledger

pub struct NewTransaction<'a> {
    pub id: Uuid,
    pub user_id: i32,
    pub creator_id: i32,
    pub amount: i64,
    pub creator_amount: i64,
    pub platform_amount: i64,
    pub transaction_type: &'a str,
    pub payment_type: &'a str,
    pub card_token: &'a str,
    pub link: LinkedEntity,
}

/// Строка леджера создаётся ДО первого сетевого вызова: упавшая посередине
/// попытка остаётся видимой для аудита и дорестраивается вебхуком.
pub async fn create_transaction(pool: &PgPool, tx: NewTransaction<'_>) -> Result<(), sqlx::Error> {
    let (subscription_id, donation_id) = tx.link.columns();
    sqlx::query(
        r#"INSERT INTO transactions
               (id, user_id, creator_id, amount, creator_amount, platform_amount,
                transaction_type, payment_type, card_token, subscription_id, donation_id)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
    )
    .bind(tx.id)
    .bind(tx.user_id)
    .bind(tx.creator_id)
    .bind(tx.amount)
    .bind(tx.creator_amount)
    .bind(tx.platform_amount)
    .bind(tx.transaction_type)
    .bind(tx.payment_type)
    .bind(tx.card_token)
    .bind(subscription_id)
    .bind(donation_id)
    .execute(pool)
    .await?;
    Ok(())
}

fn row_to_transaction(r: &PgRow) -> Transaction {
    let status: String = r.get("status");
    Transaction {
        id: r.get("id"),
        user_id: r.get("user_id"),
        creator_id: r.get("creator_id"),
        amount: r.get("amount"),
        creator_amount: r.get("creator_amount"),
        platform_amount: r.get("platform_amount"),
        transaction_type: r.get("transaction_type"),
        payment_type: r.get("payment_type"),
        card_token: r.get("card_token"),
        provider_tx_id: r.get("provider_tx_id"),
        status: TxStatus::parse(&status).unwrap_or(TxStatus::Failed),
        link: LinkedEntity::from_columns(r.get("subscription_id"), r.get("donation_id")),
        created_at: r.get("created_at"),
    }
}

const TRANSACTION_COLUMNS: &str = "id, user_id, creator_id, amount, creator_amount, \
     platform_amount, transaction_type, payment_type, card_token, provider_tx_id, \
     status, subscription_id, donation_id, created_at";

/// Блокирующая выборка строки леджера внутри транзакции БД — сериализует
/// вебхук против синхронного confirm.
pub async fn get_transaction_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|r| row_to_transaction(&r)))
}

pub async fn list_creator_transactions(
    pool: &PgPool,
    creator_id: i32,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
         WHERE creator_id = $1
         ORDER BY created_at DESC"
    ))
    .bind(creator_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_transaction).collect())
}

/// Аудит: последний сырой вебхук сохраняется независимо от исхода
/// реконсиляции.
pub async fn store_callback_payload(
    conn: &mut PgConnection,
    id: Uuid,
    payload: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET callback_payload = $2 WHERE id = $1")
        .bind(id)
        .bind(payload)
        .execute(conn)
        .await?;
    Ok(())
}

/// new -> pending_confirmation: провайдер потребовал степ-ап (OTP).
pub async fn mark_transaction_pending(
    pool: &PgPool,
    id: Uuid,
    provider_tx_id: &str,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE transactions
           SET status = 'pending_confirmation', provider_tx_id = $2
           WHERE id = $1 AND status = 'new'"#,
    )
    .bind(id)
    .bind(provider_tx_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// CAS-переход в paid + побочные эффекты ровно один раз: активация связанной
/// сущности и инкремент сбора. Возвращает false, если переход уже сделал
/// кто-то другой (или статус терминальный) — тогда эффектов не применяем.
pub async fn settle_paid(
    conn: &mut PgConnection,
    tx_id: Uuid,
    link: LinkedEntity,
    creator_amount: i64,
    payment_reference: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE transactions
           SET status = 'paid', provider_tx_id = COALESCE($2, provider_tx_id)
           WHERE id = $1 AND status IN ('new', 'pending_confirmation')"#,
    )
    .bind(tx_id)
    .bind(payment_reference)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(false);
    }

    match link {
        LinkedEntity::Subscription(id) => {
            sqlx::query(
                r#"UPDATE subscriptions
                   SET is_active = TRUE, payment_reference = COALESCE($2, payment_reference)
                   WHERE id = $1"#,
            )
            .bind(id)
            .bind(payment_reference)
            .execute(&mut *conn)
            .await?;
        }
        LinkedEntity::Donation(id) => {
            let row = sqlx::query(
                r#"UPDATE donations
                   SET is_active = TRUE, payment_reference = COALESCE($2, payment_reference)
                   WHERE id = $1
                   RETURNING fundraising_id"#,
            )
            .bind(id)
            .bind(payment_reference)
            .fetch_one(&mut *conn)
            .await?;
            let fundraising_id: Option<i32> = row.get("fundraising_id");
            if let Some(fid) = fundraising_id {
                sqlx::query(
                    "UPDATE fundraisings SET current_amount = current_amount + $2 WHERE id = $1",
                )
                .bind(fid)
                .bind(creator_amount)
                .execute(&mut *conn)
                .await?;
            }
        }
        LinkedEntity::None => {}
    }

    Ok(true)
}

/// CAS-переход в failed + деактивация связанной сущности. Терминальные
/// статусы не трогаем.
pub async fn settle_failed(
    conn: &mut PgConnection,
    tx_id: Uuid,
    link: LinkedEntity,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE transactions SET status = 'failed'
           WHERE id = $1 AND status IN ('new', 'pending_confirmation')"#,
    )
    .bind(tx_id)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(false);
    }

    match link {
        LinkedEntity::Subscription(id) => {
            sqlx::query("UPDATE subscriptions SET is_active = FALSE WHERE id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
        LinkedEntity::Donation(id) => {
            sqlx::query("UPDATE donations SET is_active = FALSE WHERE id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
        LinkedEntity::None => {}
    }

    Ok(true)
}
