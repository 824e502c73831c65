// src/api/webhooks_multibank.rs
//
// Приём коллбеков Multibank: привязка карты и статус платежа. Доставка
// at-least-once, поэтому реконсиляция обязана быть идемпотентной: по
// терминальной транзакции повторный вебхук — no-op.
//
// Оба эндпоинта требуют подпись X-Signature = hex(hmac_sha256(secret, body)).

use actix_web::{post, web, HttpRequest, HttpResponse};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db;
use crate::models::{LinkedEntity, TxStatus};
use crate::AppState;

pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

fn extract_signature(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("X-Signature")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

// ---------------------------------------------------------------------------
// bind card

const KNOWN_CARD_TYPES: &[&str] = &["visa", "uzcard", "humo", "mastercard"];

#[derive(Debug, Deserialize, ToSchema)]
pub struct BindCardCallback {
    pub session_id: String,
    pub phone: String,
    pub card_pan: Option<String>,
    pub holder_name: Option<String>,
    pub card_token: Option<String>,
    /// Платёжная система: visa | uzcard | humo | mastercard.
    pub ps: Option<String>,
}

/// Провайдеру всегда отвечаем 200 — несматченная привязка только логируется.
#[utoipa::path(
    post,
    path = "/webhook/multibank/bind-card",
    tag = "webhooks",
    request_body = BindCardCallback,
    responses(
        (status = 200, description = "Callback accepted"),
        (status = 401, description = "Bad signature")
    )
)]
#[post("/webhook/multibank/bind-card")]
pub async fn bind_card_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let signature = extract_signature(&req).unwrap_or_default();
    if !verify_signature(&state.settings.webhook_secret, &body, &signature) {
        log::warn!("bind-card webhook: bad signature");
        return HttpResponse::Unauthorized().finish();
    }

    let payload: BindCardCallback = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("bind-card webhook: malformed payload: {e}");
            return HttpResponse::Ok().json(json!({"ok": true, "ignored": true}));
        }
    };

    let card_id =
        match db::find_card_for_binding(&state.pool, &payload.session_id, &payload.phone).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                log::warn!(
                    "bind-card webhook: no pending card for session={} phone={}",
                    payload.session_id,
                    payload.phone
                );
                return HttpResponse::Ok().json(json!({"ok": true, "ignored": true}));
            }
            Err(e) => {
                log::error!("bind-card webhook: select card error: {e}");
                return HttpResponse::InternalServerError().finish();
            }
        };

    let card_type = payload
        .ps
        .as_deref()
        .filter(|ps| KNOWN_CARD_TYPES.contains(ps));
    if let Err(e) = db::bind_card(
        &state.pool,
        card_id,
        payload.card_pan.as_deref().unwrap_or_default(),
        payload.holder_name.as_deref().unwrap_or_default(),
        payload.card_token.as_deref().unwrap_or_default(),
        card_type,
    )
    .await
    {
        log::error!("bind-card webhook: update card error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    log::info!("bind-card webhook: card {card_id} activated");
    HttpResponse::Ok().json(json!({"ok": true}))
}

// ---------------------------------------------------------------------------
// payment status

/// Нормализованное событие платежа из произвольного тела провайдера.
#[derive(Debug, PartialEq, Eq)]
pub struct PaymentEvent {
    pub provider_tx_id: Option<String>,
    pub succeeded: bool,
    pub failed: bool,
}

pub fn is_success_status(s: &str) -> bool {
    matches!(s, "success" | "succeeded" | "paid" | "completed")
}

fn is_failure_status(s: &str) -> bool {
    matches!(s, "failed" | "fail" | "error" | "canceled" | "rejected")
}

/// Точный payload провайдера варьируется между ревизиями API; вытаскиваем
/// минимум: статус (или флаг paid) и id транзакции провайдера.
pub fn normalize_payment_payload(payload: &serde_json::Value) -> PaymentEvent {
    let status = payload.get("status").and_then(|v| v.as_str()).unwrap_or("");
    let paid_flag = payload.get("paid").and_then(|v| v.as_bool()).unwrap_or(false);
    let provider_tx_id = payload
        .get("transaction_id")
        .or_else(|| payload.get("uuid"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    PaymentEvent {
        provider_tx_id,
        succeeded: paid_flag || is_success_status(status),
        failed: is_failure_status(status),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Транзакция уже терминальна — повторная доставка, ничего не делаем.
    NoOp,
    SettlePaid,
    SettleFailed,
    /// Незнакомый статус: подтверждаем приём, леджер не трогаем.
    Ignore,
}

/// Чистое ядро реконсиляции: решение по (текущий статус, событие, связь).
/// Успех без связанной сущности — потерянная попытка, гасим как failed.
pub fn plan_reconciliation(
    status: TxStatus,
    event: &PaymentEvent,
    link: LinkedEntity,
) -> ReconcileAction {
    if status.is_terminal() {
        return ReconcileAction::NoOp;
    }
    if event.failed {
        return ReconcileAction::SettleFailed;
    }
    if event.succeeded {
        return match link {
            LinkedEntity::None => ReconcileAction::SettleFailed,
            _ => ReconcileAction::SettlePaid,
        };
    }
    ReconcileAction::Ignore
}

/// Статусный вебхук платежа. 400 — нет invoice_id, 404 — нет такой
/// транзакции, 200 — применили или no-op, 500 — внутренняя ошибка
/// (провайдер ретраит по 5xx).
#[utoipa::path(
    post,
    path = "/webhook/multibank/payment",
    tag = "webhooks",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Reconciled or no-op"),
        (status = 400, description = "invoice_id missing"),
        (status = 401, description = "Bad signature"),
        (status = 404, description = "Unknown transaction"),
        (status = 500, description = "Internal error")
    )
)]
#[post("/webhook/multibank/payment")]
pub async fn payment_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let signature = extract_signature(&req).unwrap_or_default();
    if !verify_signature(&state.settings.webhook_secret, &body, &signature) {
        log::warn!("payment webhook: bad signature");
        return HttpResponse::Unauthorized().finish();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("payment webhook: malformed payload: {e}");
            return HttpResponse::BadRequest().json(json!({"error": "malformed payload"}));
        }
    };

    let Some(invoice_id) = payload.get("invoice_id").and_then(|v| v.as_str()) else {
        return HttpResponse::BadRequest().json(json!({"error": "invoice_id is required"}));
    };
    let Ok(tx_id) = Uuid::parse_str(invoice_id) else {
        return HttpResponse::BadRequest().json(json!({"error": "invoice_id is not a uuid"}));
    };

    match reconcile_payment(&state.pool, tx_id, &payload).await {
        Ok(Some(action)) => {
            log::info!("payment webhook: tx {tx_id} -> {action:?}");
            HttpResponse::Ok().json(json!({"ok": true}))
        }
        Ok(None) => HttpResponse::NotFound().json(json!({"error": "unknown invoice_id"})),
        Err(e) => {
            log::error!("payment webhook: tx {tx_id} reconcile error: {e}");
            // транзакцию нельзя оставлять висеть не-терминальной: добиваем
            // в failed мимо упавшей транзакции БД и подтверждаем приём
            match force_fail(&state.pool, tx_id).await {
                Ok(()) => HttpResponse::Ok().json(json!({"ok": true, "degraded": true})),
                Err(e2) => {
                    log::error!("payment webhook: tx {tx_id} force-fail error: {e2}");
                    HttpResponse::InternalServerError().finish()
                }
            }
        }
    }
}

/// Реконсиляция под row-level блокировкой строки леджера: вебхук и
/// синхронный confirm не могут применить эффекты одновременно.
async fn reconcile_payment(
    pool: &PgPool,
    tx_id: Uuid,
    payload: &serde_json::Value,
) -> Result<Option<ReconcileAction>, sqlx::Error> {
    let mut conn = pool.begin().await?;

    let Some(transaction) = db::get_transaction_for_update(&mut conn, tx_id).await? else {
        return Ok(None);
    };

    db::store_callback_payload(&mut conn, tx_id, payload).await?;

    let event = normalize_payment_payload(payload);
    let action = plan_reconciliation(transaction.status, &event, transaction.link);
    match action {
        ReconcileAction::SettlePaid => {
            db::settle_paid(
                &mut conn,
                tx_id,
                transaction.link,
                transaction.creator_amount,
                event.provider_tx_id.as_deref(),
            )
            .await?;
        }
        ReconcileAction::SettleFailed => {
            db::settle_failed(&mut conn, tx_id, transaction.link).await?;
        }
        ReconcileAction::NoOp | ReconcileAction::Ignore => {}
    }

    conn.commit().await?;
    Ok(Some(action))
}

async fn force_fail(pool: &PgPool, tx_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE transactions SET status = 'failed'
           WHERE id = $1 AND status IN ('new', 'pending_confirmation')"#,
    )
    .bind(tx_id)
    .execute(pool)
    .await?;
    Ok(())
}
