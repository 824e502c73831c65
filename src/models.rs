// src/models.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Состояние платёжной попытки в леджере. `paid` и `failed` терминальны:
/// из них нет переходов, повторная доставка вебхука — no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    New,
    PendingConfirmation,
    Paid,
    Failed,
}

impl TxStatus {
    pub fn parse(s: &str) -> Option<TxStatus> {
        match s {
            "new" => Some(TxStatus::New),
            "pending_confirmation" => Some(TxStatus::PendingConfirmation),
            "paid" => Some(TxStatus::Paid),
            "failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Paid | TxStatus::Failed)
    }
}

/// Связанная сущность транзакции: подписка ИЛИ донат, либо ничего.
/// В БД это две nullable-колонки с CHECK-ограничением; в коде — sum type,
/// чтобы "ровно одна или ни одной" держалось на уровне типов.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedEntity {
    Subscription(i32),
    Donation(i32),
    None,
}

impl LinkedEntity {
    pub fn from_columns(subscription_id: Option<i32>, donation_id: Option<i32>) -> LinkedEntity {
        match (subscription_id, donation_id) {
            (Some(id), _) => LinkedEntity::Subscription(id),
            (None, Some(id)) => LinkedEntity::Donation(id),
            (None, None) => LinkedEntity::None,
        }
    }

    pub fn columns(&self) -> (Option<i32>, Option<i32>) {
        match self {
            LinkedEntity::Subscription(id) => (Some(*id), None),
            LinkedEntity::Donation(id) => (None, Some(*id)),
            LinkedEntity::None => (None, None),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Card {
    pub id: i32,
    pub user_id: i32,
    pub number: Option<String>,
    pub card_owner: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub card_type: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Платёжные реквизиты и комиссионные настройки создателя.
/// Read-only вход для оркестратора; владеет этими полями профильный модуль.
#[derive(Debug)]
pub struct Creator {
    pub id: i32,
    pub is_creator: bool,
    pub sapi_share: i16,
    pub pinfl: Option<String>,
    pub multibank_account: Option<String>,
    pub multibank_verified: bool,
    pub minimum_message_donation: i64,
    pub max_donation_letters: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionPlan {
    pub id: i32,
    pub creator_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub duration_days: Option<i32>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct Subscription {
    pub id: i32,
    pub subscriber_id: i32,
    pub creator_id: i32,
    pub plan_id: i32,
    pub card_id: i32,
    pub commission_by_subscriber: bool,
    pub one_time: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub payment_reference: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct Donation {
    pub id: i32,
    pub donator_id: i32,
    pub creator_id: i32,
    pub fundraising_id: Option<i32>,
    pub amount: i64,
    pub message: Option<String>,
    pub commission_by_subscriber: bool,
    pub is_active: bool,
    pub payment_reference: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct Fundraising {
    pub id: i32,
    pub creator_id: i32,
    pub title: String,
    pub goal: i64,
    pub deadline: Option<DateTime<Utc>>,
    pub minimum_donation: Option<i64>,
    pub current_amount: i64,
    pub is_active: bool,
}

/// Строка леджера. После перехода в `paid` запись неизменяема, кроме
/// callback_payload (аудит последнего вебхука).
#[derive(Debug, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: i32,
    pub creator_id: i32,
    pub amount: i64,
    pub creator_amount: i64,
    pub platform_amount: i64,
    pub transaction_type: String,
    pub payment_type: String,
    #[serde(skip_serializing)]
    pub card_token: String,
    pub provider_tx_id: Option<String>,
    pub status: TxStatus,
    #[serde(skip_serializing)]
    pub link: LinkedEntity,
    pub created_at: Option<DateTime<Utc>>,
}
