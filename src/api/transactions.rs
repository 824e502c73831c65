// src/api/transactions.rs

use actix_web::{get, web, HttpResponse, Responder};

use crate::{db, AppState};

/// Леджер глазами создателя: все попытки списаний в его пользу.
#[get("/transactions")]
pub async fn list_my_transactions(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> impl Responder {
    match db::list_creator_transactions(&state.pool, *user_id).await {
        Ok(transactions) => HttpResponse::Ok().json(transactions),
        Err(e) => {
            log::error!("list_my_transactions db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
