// src/scheduler.rs
//
// Автопродление подписок: продюсер по таймеру находит истёкшие подписки и
// кладёт их в очередь, консьюмер продлевает по одной. Ошибка на одной
// подписке не трогает остальные — сообщение всегда ack'ается, ретрай
// случится в следующем цикле продюсера.

use chrono::{DateTime, Datelike, Duration, Utc};
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::Settings;
use crate::db;
use crate::orchestrator::{ChargeKind, ChargeRequest, PaymentOrchestrator};

const QUEUE_NAME: &str = "billing.resubscribe";
const CONSUMER_TAG: &str = "resubscribe-consumer";
const PREFETCH: u16 = 8;

#[derive(Debug, Serialize, Deserialize)]
struct RenewalMessage {
    subscription_id: i32,
}

/// Период продления: длительность тарифа, а для тарифов без длительности —
/// столько дней, сколько в текущем календарном месяце (не фиксированные 30).
pub fn renewal_period(duration_days: Option<i32>, now: DateTime<Utc>) -> Duration {
    match duration_days {
        Some(days) => Duration::days(days as i64),
        None => Duration::days(days_in_month(now.year(), now.month())),
    }
}

fn days_in_month(year: i32, month: u32) -> i64 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first = chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid month start");
    (next - first).num_days()
}

#[derive(Debug, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed { new_end_date: DateTime<Utc> },
    /// Блокировка между подписчиком и создателем: подписка деактивирована,
    /// списание не делалось.
    DeactivatedBlocked,
    /// План удалён — продлевать нечего.
    DeactivatedNoPlan,
    /// Сообщение устарело: подписка уже не активна или ещё не истекла.
    NotDue,
    /// Списание не прошло (в т.ч. потребовался OTP): подписка остаётся
    /// активной, следующий цикл попробует снова.
    Failed(String),
}

/// Продление одной подписки, полностью изолированное от остального батча.
pub async fn renew_subscription(
    pool: &PgPool,
    orchestrator: &PaymentOrchestrator,
    subscription_id: i32,
) -> Result<RenewalOutcome, String> {
    let sub = db::get_subscription(pool, subscription_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("subscription {subscription_id} not found"))?;

    if !sub.is_active || sub.one_time || sub.end_date >= Utc::now() {
        return Ok(RenewalOutcome::NotDue);
    }

    // блокировка в любую сторону с момента подписки — единственная причина,
    // по которой планировщик гасит подписку
    if db::users_blocked(pool, sub.subscriber_id, sub.creator_id)
        .await
        .map_err(|e| e.to_string())?
    {
        db::deactivate_subscription(pool, sub.id)
            .await
            .map_err(|e| e.to_string())?;
        return Ok(RenewalOutcome::DeactivatedBlocked);
    }

    let Some(plan) = db::get_plan(pool, sub.plan_id)
        .await
        .map_err(|e| e.to_string())?
    else {
        db::deactivate_subscription(pool, sub.id)
            .await
            .map_err(|e| e.to_string())?;
        return Ok(RenewalOutcome::DeactivatedNoPlan);
    };

    let outcome = orchestrator
        .charge(ChargeRequest {
            payer_id: sub.subscriber_id,
            creator_id: sub.creator_id,
            card_id: sub.card_id,
            kind: ChargeKind::Renewal {
                subscription_id: sub.id,
            },
            commission_by_subscriber: sub.commission_by_subscriber,
        })
        .await;

    match outcome {
        Ok(o) if !o.needs_step_up => {
            let now = Utc::now();
            let new_end_date = now + renewal_period(plan.duration_days, now);
            db::extend_subscription(pool, sub.id, new_end_date)
                .await
                .map_err(|e| e.to_string())?;
            Ok(RenewalOutcome::Renewed { new_end_date })
        }
        Ok(_) => {
            // некому пройти OTP в фоновом продлении
            Ok(RenewalOutcome::Failed("step-up required".to_string()))
        }
        Err(e) => Ok(RenewalOutcome::Failed(e.to_string())),
    }
}

pub async fn start_resubscribe_worker(
    pool: PgPool,
    orchestrator: PaymentOrchestrator,
    settings: Settings,
) {
    let Some(rabbit_url) = settings.rabbitmq_url.clone() else {
        log::warn!("RABBITMQ_URL not set, resubscribe worker disabled");
        return;
    };

    let conn = match Connection::connect(&rabbit_url, ConnectionProperties::default()).await {
        Ok(c) => c,
        Err(e) => {
            log::error!("rabbitmq connect error: {e}");
            return;
        }
    };

    let channel = match conn.create_channel().await {
        Ok(c) => c,
        Err(e) => {
            log::error!("rabbitmq channel error: {e}");
            return;
        }
    };

    if let Err(e) = channel
        .queue_declare(QUEUE_NAME, QueueDeclareOptions::default(), FieldTable::default())
        .await
    {
        log::error!("rabbitmq declare queue error: {e}");
        return;
    }

    if let Err(e) = channel.basic_qos(PREFETCH, BasicQosOptions::default()).await {
        log::error!("rabbitmq qos error: {e}");
        return;
    }

    let interval = settings.resubscribe_interval_secs;
    let batch_size = settings.resubscribe_batch_size;

    let producer_pool = pool.clone();
    let producer_channel = channel.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = enqueue_due_subscriptions(&producer_pool, &producer_channel, batch_size).await
            {
                log::error!("resubscribe enqueue error: {e}");
            }
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        }
    });

    tokio::spawn(async move {
        if let Err(e) = consume_renewals(&pool, &orchestrator, &channel).await {
            log::error!("resubscribe consume error: {e}");
        }
    });
}

async fn enqueue_due_subscriptions(
    pool: &PgPool,
    channel: &Channel,
    batch_size: i64,
) -> Result<(), String> {
    let due = db::due_subscription_ids(pool, batch_size)
        .await
        .map_err(|e| e.to_string())?;
    if due.is_empty() {
        return Ok(());
    }

    log::info!("resubscribe: enqueueing {} due subscriptions", due.len());
    for subscription_id in due {
        let payload =
            serde_json::to_vec(&RenewalMessage { subscription_id }).map_err(|e| e.to_string())?;
        channel
            .basic_publish(
                "",
                QUEUE_NAME,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| e.to_string())?
            .await
            .map_err(|e| e.to_string())?;
    }

    Ok(())
}

async fn consume_renewals(
    pool: &PgPool,
    orchestrator: &PaymentOrchestrator,
    channel: &Channel,
) -> Result<(), String> {
    let mut consumer = channel
        .basic_consume(
            QUEUE_NAME,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| e.to_string())?;

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                log::error!("rabbitmq delivery error: {e}");
                continue;
            }
        };

        if let Err(e) = handle_renewal_message(pool, orchestrator, &delivery.data).await {
            log::error!("resubscribe: handle message error: {e}");
        }

        let _ = delivery.ack(BasicAckOptions::default()).await;
    }

    Ok(())
}

async fn handle_renewal_message(
    pool: &PgPool,
    orchestrator: &PaymentOrchestrator,
    data: &[u8],
) -> Result<(), String> {
    let msg: RenewalMessage = serde_json::from_slice(data).map_err(|e| e.to_string())?;
    let outcome = renew_subscription(pool, orchestrator, msg.subscription_id).await?;
    match outcome {
        RenewalOutcome::Renewed { new_end_date } => {
            log::info!(
                "resubscribe: subscription {} renewed until {}",
                msg.subscription_id,
                new_end_date
            );
        }
        RenewalOutcome::DeactivatedBlocked => {
            log::info!(
                "resubscribe: subscription {} deactivated (block relation)",
                msg.subscription_id
            );
        }
        RenewalOutcome::DeactivatedNoPlan => {
            log::info!(
                "resubscribe: subscription {} deactivated (plan deleted)",
                msg.subscription_id
            );
        }
        RenewalOutcome::NotDue => {}
        RenewalOutcome::Failed(reason) => {
            log::warn!(
                "resubscribe: subscription {} charge failed, will retry next cycle: {}",
                msg.subscription_id,
                reason
            );
        }
    }
    Ok(())
}
