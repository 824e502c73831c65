// src/orchestrator.rs
//
// Единственная точка, через которую платформа двигает деньги. Один вызов
// charge() — одна попытка платежа: сплит, строка леджера, резолв получателя,
// создание платежа, степ-ап или подтверждение, финализация связанной
// сущности.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::multibank_client::{
    CardRef, CreatePaymentRequest, MultibankClient, MultibankError, OfdLine, SplitEntry,
};
use crate::api::webhooks_multibank::is_success_status;
use crate::commission::{self, CommissionError};
use crate::config::Settings;
use crate::db::{self, NewTransaction};
use crate::models::LinkedEntity;
use crate::scheduler::renewal_period;

#[derive(Debug, Error)]
pub enum ChargeError {
    #[error("{0}")]
    Validation(String),
    #[error("subscription already active for this plan")]
    AlreadySubscribed,
    /// Провайдер ответил 2xx, но платёж не прошёл.
    #[error("payment declined: {0}")]
    Declined(String),
    #[error(transparent)]
    Gateway(#[from] MultibankError),
    /// Ошибка конфигурации тарифа/реквизитов — фатальна, не ретраится.
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub enum ChargeKind {
    /// Покупка подписки: создаёт новую строку подписки под уникальным
    /// индексом живых подписок.
    Subscription { plan_id: i32, one_time: bool },
    /// Автопродление существующей подписки; новых строк не создаёт,
    /// end_date двигает планировщик после успеха.
    Renewal { subscription_id: i32 },
    Donation {
        fundraising_id: Option<i32>,
        message: Option<String>,
        amount_major: i64,
    },
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payer_id: i32,
    pub creator_id: i32,
    pub card_id: i32,
    pub kind: ChargeKind,
    pub commission_by_subscriber: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChargeOutcome {
    pub transaction_id: Uuid,
    /// true — платёж ждёт OTP-подтверждения, покупку нельзя считать
    /// завершённой; довершит её вебхук.
    pub needs_step_up: bool,
    pub redirect_url: Option<String>,
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    pool: PgPool,
    multibank: MultibankClient,
    settings: Settings,
}

impl PaymentOrchestrator {
    pub fn new(pool: PgPool, multibank: MultibankClient, settings: Settings) -> PaymentOrchestrator {
        PaymentOrchestrator {
            pool,
            multibank,
            settings,
        }
    }

    pub async fn charge(&self, req: ChargeRequest) -> Result<ChargeOutcome, ChargeError> {
        // 1. карта принадлежит плательщику и привязана
        let card = db::get_card(&self.pool, req.card_id)
            .await?
            .filter(|c| c.user_id == req.payer_id && c.is_active)
            .ok_or_else(|| ChargeError::Validation("card not found".to_string()))?;
        let card_token = card
            .token
            .ok_or_else(|| ChargeError::Validation("card is not bound".to_string()))?;

        // 2. создатель и его платёжные реквизиты
        let creator = db::get_creator(&self.pool, req.creator_id)
            .await?
            .filter(|c| c.is_creator)
            .ok_or_else(|| ChargeError::Validation("creator not found".to_string()))?;
        let pinfl = creator
            .pinfl
            .clone()
            .ok_or_else(|| ChargeError::Config("creator has no tax id (pinfl)".to_string()))?;
        let account = creator.multibank_account.clone().ok_or_else(|| {
            ChargeError::Config("creator has no multibank account".to_string())
        })?;

        // 3. сумма и валидации, зависящие от вида платежа
        let now = Utc::now();
        let (amount_major, prepared) = match &req.kind {
            ChargeKind::Subscription { plan_id, one_time } => {
                let plan = db::get_plan(&self.pool, *plan_id)
                    .await?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| ChargeError::Validation("plan not found".to_string()))?;
                if plan.creator_id != req.creator_id {
                    return Err(ChargeError::Validation(
                        "plan does not belong to this creator".to_string(),
                    ));
                }
                if db::has_overlapping_subscription(&self.pool, req.payer_id, *plan_id).await? {
                    return Err(ChargeError::AlreadySubscribed);
                }
                let end_date = now + renewal_period(plan.duration_days, now);
                (
                    plan.price,
                    PreparedLink::NewSubscription {
                        plan_id: *plan_id,
                        one_time: *one_time,
                        end_date,
                    },
                )
            }
            ChargeKind::Renewal { subscription_id } => {
                let sub = db::get_subscription(&self.pool, *subscription_id)
                    .await?
                    .ok_or_else(|| {
                        ChargeError::Validation("subscription not found".to_string())
                    })?;
                if sub.subscriber_id != req.payer_id || sub.creator_id != req.creator_id {
                    return Err(ChargeError::Validation(
                        "subscription does not match payer/creator".to_string(),
                    ));
                }
                let plan = db::get_plan(&self.pool, sub.plan_id)
                    .await?
                    .ok_or_else(|| ChargeError::Validation("plan not found".to_string()))?;
                (plan.price, PreparedLink::ExistingSubscription(sub.id))
            }
            ChargeKind::Donation {
                fundraising_id,
                message,
                amount_major,
            } => {
                if *amount_major <= 0 {
                    return Err(ChargeError::Validation("amount must be positive".to_string()));
                }
                let amount_minor = amount_major * 100;
                if let Some(fid) = fundraising_id {
                    let fundraising = db::get_fundraising(&self.pool, *fid)
                        .await?
                        .filter(|f| f.is_active)
                        .ok_or_else(|| {
                            ChargeError::Validation("fundraising not found".to_string())
                        })?;
                    if fundraising.creator_id != req.creator_id {
                        return Err(ChargeError::Validation(
                            "fundraising does not belong to this creator".to_string(),
                        ));
                    }
                    if let Some(min) = fundraising.minimum_donation {
                        if amount_minor < min {
                            return Err(ChargeError::Validation(
                                "donation is below the fundraising minimum".to_string(),
                            ));
                        }
                    }
                }
                // сообщение показываем только начиная с порога создателя,
                // и не длиннее его лимита
                let mut message = message.clone().filter(|m| !m.is_empty());
                if amount_minor < creator.minimum_message_donation {
                    message = None;
                }
                if let (Some(m), Some(max)) = (&message, creator.max_donation_letters) {
                    message = Some(m.chars().take(max as usize).collect());
                }
                (
                    *amount_major,
                    PreparedLink::NewDonation {
                        fundraising_id: *fundraising_id,
                        message,
                    },
                )
            }
        };

        // 4. тарифы и цены заданы в сумах, леджер и провайдер работают
        // в тийинах
        let amount_minor = amount_major * 100;
        let split = commission::split(
            amount_minor,
            creator.sapi_share as i64,
            req.commission_by_subscriber,
        )
        .map_err(|e| match e {
            CommissionError::InvalidAmount(_) => ChargeError::Validation(e.to_string()),
            _ => ChargeError::Config(e.to_string()),
        })?;

        // 5. связанная сущность
        let link = match prepared {
            PreparedLink::NewSubscription {
                plan_id,
                one_time,
                end_date,
            } => {
                let sub_id = db::insert_subscription(
                    &self.pool,
                    req.payer_id,
                    req.creator_id,
                    plan_id,
                    req.card_id,
                    req.commission_by_subscriber,
                    one_time,
                    end_date,
                )
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ChargeError::AlreadySubscribed
                    } else {
                        ChargeError::Db(e)
                    }
                })?;
                LinkedEntity::Subscription(sub_id)
            }
            PreparedLink::ExistingSubscription(id) => LinkedEntity::Subscription(id),
            PreparedLink::NewDonation {
                fundraising_id,
                message,
            } => {
                let donation_id = db::insert_donation(
                    &self.pool,
                    req.payer_id,
                    req.creator_id,
                    fundraising_id,
                    amount_minor,
                    message.as_deref(),
                    req.commission_by_subscriber,
                )
                .await?;
                LinkedEntity::Donation(donation_id)
            }
        };
        // при неуспехе продления подписку не трогаем: транзиентный отказ
        // не повод её гасить, следующий цикл попробует снова
        let fail_link = match &req.kind {
            ChargeKind::Renewal { .. } => LinkedEntity::None,
            _ => link,
        };

        // 6. строка леджера — до любого сетевого вызова
        let tx_id = Uuid::new_v4();
        db::create_transaction(
            &self.pool,
            NewTransaction {
                id: tx_id,
                user_id: req.payer_id,
                creator_id: req.creator_id,
                amount: split.gross_amount,
                creator_amount: split.creator_amount,
                platform_amount: split.ledger_platform_amount(),
                transaction_type: match &req.kind {
                    ChargeKind::Donation { .. } => "donation",
                    _ => "subscription",
                },
                payment_type: "card",
                card_token: &card_token,
                link,
            },
        )
        .await?;

        // 7. резолв получателя выплат создателя
        let recipient = match self
            .multibank
            .get_recipient(&pinfl, &self.settings.bank_mfo, &account)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("tx {tx_id}: recipient resolve failed: {e}");
                self.fail_attempt(tx_id, fail_link).await;
                return Err(ChargeError::Gateway(e));
            }
        };

        // 8. сплит и зеркальный фискальный чек
        let receiver_uuid = recipient.data.uuid;
        let platform_total = split.ledger_platform_amount();
        let split_entries = vec![
            SplitEntry {
                kind: "account",
                receipient: &receiver_uuid,
                amount: split.creator_amount,
            },
            SplitEntry {
                kind: "account",
                receipient: &self.settings.platform_receiver_id,
                amount: platform_total,
            },
        ];
        let ofd = vec![
            OfdLine {
                name: match &req.kind {
                    ChargeKind::Donation { .. } => "Донат создателю".to_string(),
                    _ => "Подписка на создателя".to_string(),
                },
                count: 1,
                price: split.creator_amount,
                total: split.creator_amount,
            },
            OfdLine {
                name: "Сервисный сбор платформы".to_string(),
                count: 1,
                price: platform_total,
                total: platform_total,
            },
        ];
        debug_assert_eq!(
            ofd.iter().map(|l| l.total).sum::<i64>(),
            split.gross_amount
        );

        // 9. создание платежа
        let payment = match self
            .multibank
            .create_payment(&CreatePaymentRequest {
                card: CardRef { token: &card_token },
                amount: split.gross_amount,
                store_id: self.settings.multibank_store_id,
                invoice_id: tx_id.to_string(),
                split: split_entries,
                ofd,
                callback_url: format!(
                    "{}/webhook/multibank/payment",
                    self.settings.callback_base_url
                ),
            })
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("tx {tx_id}: create payment failed: {e}");
                self.fail_attempt(tx_id, fail_link).await;
                return Err(ChargeError::Gateway(e));
            }
        };

        let provider_tx_id = payment.data.transaction_id;

        // 10. степ-ап: пауза до OTP, довершает вебхук
        if payment.data.otp_hash.is_some() {
            db::mark_transaction_pending(&self.pool, tx_id, &provider_tx_id).await?;
            match fail_link {
                LinkedEntity::Subscription(id) => db::deactivate_subscription(&self.pool, id).await?,
                LinkedEntity::Donation(id) => db::deactivate_donation(&self.pool, id).await?,
                LinkedEntity::None => {}
            }
            log::info!("tx {tx_id}: step-up required, waiting for OTP");
            return Ok(ChargeOutcome {
                transaction_id: tx_id,
                needs_step_up: true,
                redirect_url: payment.data.checkout_url,
            });
        }

        // 11. подтверждение без степ-апа
        let confirm = match self.multibank.confirm_payment(&provider_tx_id).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("tx {tx_id}: confirm failed: {e}");
                self.fail_attempt(tx_id, fail_link).await;
                return Err(ChargeError::Gateway(e));
            }
        };
        if !is_success_status(&confirm.data.status) {
            log::warn!("tx {tx_id}: confirm status {}", confirm.data.status);
            self.fail_attempt(tx_id, fail_link).await;
            return Err(ChargeError::Declined(confirm.data.status));
        }

        // 12. финализация: эффекты применяет тот, кто выиграл CAS в paid
        let mut conn = self.pool.begin().await?;
        let won = db::settle_paid(
            &mut conn,
            tx_id,
            link,
            split.creator_amount,
            Some(&provider_tx_id),
        )
        .await?;
        conn.commit().await?;
        if !won {
            // вебхук успел раньше — это не ошибка, эффекты уже применены
            log::info!("tx {tx_id}: already settled by webhook");
        }

        log::info!(
            "tx {tx_id}: paid, gross={} creator={} platform={}",
            split.gross_amount,
            split.creator_amount,
            platform_total
        );
        Ok(ChargeOutcome {
            transaction_id: tx_id,
            needs_step_up: false,
            redirect_url: None,
        })
    }

    /// Жёсткий отказ текущей попытки: леджер в failed, связанная сущность
    /// (кроме продлений) деактивируется. Ошибки здесь только логируем —
    /// исходная ошибка адаптера важнее.
    async fn fail_attempt(&self, tx_id: Uuid, link: LinkedEntity) {
        let mut conn = match self.pool.begin().await {
            Ok(c) => c,
            Err(e) => {
                log::error!("tx {tx_id}: failed to open tx for settle_failed: {e}");
                return;
            }
        };
        if let Err(e) = db::settle_failed(&mut conn, tx_id, link).await {
            log::error!("tx {tx_id}: settle_failed error: {e}");
            return;
        }
        if let Err(e) = conn.commit().await {
            log::error!("tx {tx_id}: settle_failed commit error: {e}");
        }
    }
}

/// Что именно будет привязано к транзакции — решается до первой записи.
enum PreparedLink {
    NewSubscription {
        plan_id: i32,
        one_time: bool,
        end_date: chrono::DateTime<Utc>,
    },
    ExistingSubscription(i32),
    NewDonation {
        fundraising_id: Option<i32>,
        message: Option<String>,
    },
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
