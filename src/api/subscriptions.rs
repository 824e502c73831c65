// src/api/subscriptions.rs

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::orchestrator::{ChargeError, ChargeKind, ChargeRequest};
use crate::{db, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub plan_id: i32,
    pub card_id: i32,
    #[serde(default)]
    pub commission_by_subscriber: bool,
    #[serde(default)]
    pub one_time: bool,
}

/// Маппинг ошибок оркестратора в HTTP-ответы `{"error": ...}`.
pub fn charge_error_response(e: ChargeError) -> HttpResponse {
    match e {
        ChargeError::Validation(msg) => HttpResponse::BadRequest().json(json!({"error": msg})),
        ChargeError::AlreadySubscribed => {
            HttpResponse::Conflict().json(json!({"error": "subscription already active"}))
        }
        ChargeError::Declined(status) => HttpResponse::BadRequest().json(json!({
            "error": "payment declined",
            "details": status
        })),
        ChargeError::Gateway(e) => HttpResponse::BadRequest().json(json!({
            "error": "payment failed",
            "details": e.to_string()
        })),
        ChargeError::Config(msg) => {
            log::error!("charge config error: {msg}");
            HttpResponse::InternalServerError().finish()
        }
        ChargeError::Db(e) => {
            log::error!("charge db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Покупка подписки. При needs_step_up=true покупка не завершена —
/// клиент уводит пользователя на redirect_url, остальное довершит вебхук.
#[utoipa::path(
    post,
    path = "/api/subscribe",
    tag = "billing",
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Charge attempted", body = crate::orchestrator::ChargeOutcome),
        (status = 400, description = "Validation or payment failure"),
        (status = 409, description = "Subscription already active")
    )
)]
#[post("/subscribe")]
pub async fn subscribe(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    payload: web::Json<SubscribeRequest>,
) -> impl Responder {
    let payer_id = *user_id;

    let plan = match db::get_plan(&state.pool, payload.plan_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return HttpResponse::BadRequest().json(json!({"error": "plan not found"})),
        Err(e) => {
            log::error!("subscribe: select plan error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let result = state
        .orchestrator
        .charge(ChargeRequest {
            payer_id,
            creator_id: plan.creator_id,
            card_id: payload.card_id,
            kind: ChargeKind::Subscription {
                plan_id: payload.plan_id,
                one_time: payload.one_time,
            },
            commission_by_subscriber: payload.commission_by_subscriber,
        })
        .await;

    match result {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(e) => charge_error_response(e),
    }
}

#[get("/subscriptions")]
pub async fn list_subscriptions(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> impl Responder {
    match db::list_user_subscriptions(&state.pool, *user_id).await {
        Ok(subs) => HttpResponse::Ok().json(subs),
        Err(e) => {
            log::error!("list_subscriptions db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Отмена: подписка гаснет сразу, но доступ по оплаченному периоду решает
/// профильный модуль по end_date.
#[post("/subscriptions/{id}/cancel")]
pub async fn cancel_subscription(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
) -> impl Responder {
    match db::cancel_subscription(&state.pool, path.into_inner(), *user_id).await {
        Ok(Some(end_date)) => HttpResponse::Ok().json(json!({
            "detail": "subscription canceled",
            "end_date": end_date
        })),
        Ok(None) => HttpResponse::NotFound().json(json!({"error": "subscription not found"})),
        Err(e) => {
            log::error!("cancel_subscription db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
