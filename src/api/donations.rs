// src/api/donations.rs

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::subscriptions::charge_error_response;
use crate::orchestrator::{ChargeKind, ChargeRequest};
use crate::{db, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct DonateRequest {
    pub creator_id: i32,
    pub card_id: i32,
    /// Сумма в сумах (мажорные единицы).
    pub amount: i64,
    pub message: Option<String>,
    pub fundraising_id: Option<i32>,
    #[serde(default)]
    pub commission_by_subscriber: bool,
}

/// Донат создателю, опционально в рамках сбора. Сообщение режется по
/// настройкам создателя (порог суммы и лимит длины) ещё в оркестраторе.
#[utoipa::path(
    post,
    path = "/api/donate",
    tag = "billing",
    request_body = DonateRequest,
    responses(
        (status = 200, description = "Charge attempted", body = crate::orchestrator::ChargeOutcome),
        (status = 400, description = "Validation or payment failure")
    )
)]
#[post("/donate")]
pub async fn donate(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    payload: web::Json<DonateRequest>,
) -> impl Responder {
    let payload = payload.into_inner();

    let result = state
        .orchestrator
        .charge(ChargeRequest {
            payer_id: *user_id,
            creator_id: payload.creator_id,
            card_id: payload.card_id,
            kind: ChargeKind::Donation {
                fundraising_id: payload.fundraising_id,
                message: payload.message,
                amount_major: payload.amount,
            },
            commission_by_subscriber: payload.commission_by_subscriber,
        })
        .await;

    match result {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(e) => charge_error_response(e),
    }
}

/// Подтверждённые донаты, полученные текущим пользователем как создателем.
#[get("/donations")]
pub async fn list_my_donations(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> impl Responder {
    match db::list_creator_donations(&state.pool, *user_id).await {
        Ok(donations) => HttpResponse::Ok().json(donations),
        Err(e) => {
            log::error!("list_my_donations db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
