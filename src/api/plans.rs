// src/api/plans.rs

use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;

use crate::models::SubscriptionPlan;
use crate::{commission, db, AppState};

#[derive(Debug, Serialize)]
pub struct PlanWithCommission {
    #[serde(flatten)]
    pub plan: SubscriptionPlan,
    /// Сколько тийинов подписчик заплатит сверх цены, если комиссия на нём.
    pub commission: i64,
}

/// Активные тарифы создателя с превью комиссии для подписчика.
#[get("/plans/{creator_id}")]
pub async fn list_creator_plans(
    state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let creator_id = path.into_inner();

    let creator = match db::get_creator(&state.pool, creator_id).await {
        Ok(Some(c)) if c.is_creator => c,
        Ok(_) => return HttpResponse::NotFound().finish(),
        Err(e) => {
            log::error!("list_creator_plans: select creator error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let plans = match db::list_creator_plans(&state.pool, creator_id).await {
        Ok(p) => p,
        Err(e) => {
            log::error!("list_creator_plans db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let out: Vec<PlanWithCommission> = plans
        .into_iter()
        .map(|plan| {
            let commission = commission::split(plan.price * 100, creator.sapi_share as i64, true)
                .map(|s| s.gross_amount - s.creator_amount)
                .unwrap_or(0);
            PlanWithCommission { plan, commission }
        })
        .collect();

    HttpResponse::Ok().json(out)
}
